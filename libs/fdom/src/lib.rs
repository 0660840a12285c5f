//! A small mutable document tree, to hold and manipulate markup
//! outside of a browser.

pub mod arena;
pub mod kstr;
pub mod dom;
pub mod parse;

use std::io::Write;

use anyhow::Result;

pub use arena::{Arena, Id, RegionId};
pub use dom::{Dom, Descendants, Element, Node, NodeId, NodeKind, TemplateMode,
              TEMPLATE_TAG, VOID_ELEMENTS};
pub use kstr::IntoKString;

pub trait Print {
    /// Print serialized HTML.
    fn print_html_fragment(&self, out: &mut impl Write, dom: &Dom) -> Result<()>;

    /// Print plain text, completely *ignoring* HTML markup.
    fn print_plain(&self, out: &mut String, dom: &Dom) -> Result<()>;

    fn to_html_fragment_string(&self, dom: &Dom) -> Result<String> {
        let mut s = Vec::new();
        self.print_html_fragment(&mut s, dom)?;
        Ok(String::from_utf8(s)?)
    }

    fn to_plain_string(&self, dom: &Dom) -> Result<String> {
        let mut s = String::new();
        self.print_plain(&mut s, dom)?;
        Ok(s)
    }
}

/// Write `s` with the characters special in HTML text and attribute
/// values escaped.
pub fn html_escape(out: &mut impl Write, s: &str) -> std::io::Result<()> {
    let bytes = s.as_bytes();
    let mut done = 0;
    for (i, b) in bytes.iter().enumerate() {
        let rep: &[u8] = match b {
            b'&' => b"&amp;",
            b'<' => b"&lt;",
            b'>' => b"&gt;",
            b'"' => b"&quot;",
            b'\'' => b"&#39;",
            _ => continue
        };
        out.write_all(&bytes[done..i])?;
        out.write_all(rep)?;
        done = i + 1;
    }
    out.write_all(&bytes[done..])
}

/// The serialized children of `id`, leaving out `id` itself.
pub fn inner_html_string(dom: &Dom, id: NodeId) -> Result<String> {
    dom.children(id).to_html_fragment_string(dom)
}

impl Print for NodeId {
    fn print_html_fragment(&self, out: &mut impl Write, dom: &Dom) -> Result<()> {
        let node = dom.node(*self)?;
        match node.kind() {
            NodeKind::Document | NodeKind::Fragment =>
                node.children().print_html_fragment(out, dom)?,
            NodeKind::Element(e) => {
                out.write_all(b"<")?;
                out.write_all(e.tag.as_bytes())?;
                for (k, v) in &e.attrs {
                    out.write_all(b" ")?;
                    out.write_all(k.as_bytes())?;
                    out.write_all(b"=\"")?;
                    html_escape(out, v)?;
                    out.write_all(b"\"")?;
                }
                out.write_all(b">")?;
                if VOID_ELEMENTS.contains(e.tag.as_str()) {
                    return Ok(())
                }
                if let Some(content) = e.content {
                    content.print_html_fragment(out, dom)?;
                }
                node.children().print_html_fragment(out, dom)?;
                out.write_all(b"</")?;
                out.write_all(e.tag.as_bytes())?;
                out.write_all(b">")?;
            }
            NodeKind::Text(s) => html_escape(out, s)?,
            NodeKind::Comment(s) => {
                out.write_all(b"<!--")?;
                out.write_all(s.as_bytes())?;
                out.write_all(b"-->")?;
            }
        }
        Ok(())
    }

    fn print_plain(&self, out: &mut String, dom: &Dom) -> Result<()> {
        let node = dom.node(*self)?;
        match node.kind() {
            NodeKind::Text(s) => out.push_str(s),
            NodeKind::Comment(_) => (),
            _ => node.children().print_plain(out, dom)?,
        }
        Ok(())
    }
}

impl Print for [NodeId] {
    fn print_html_fragment(&self, out: &mut impl Write, dom: &Dom) -> Result<()> {
        for id in self {
            id.print_html_fragment(out, dom)?;
        }
        Ok(())
    }

    fn print_plain(&self, out: &mut String, dom: &Dom) -> Result<()> {
        for id in self {
            id.print_plain(out, dom)?;
        }
        Ok(())
    }
}

impl Print for Vec<NodeId> {
    fn print_html_fragment(&self, out: &mut impl Write, dom: &Dom) -> Result<()> {
        self.as_slice().print_html_fragment(out, dom)
    }

    fn print_plain(&self, out: &mut String, dom: &Dom) -> Result<()> {
        self.as_slice().print_plain(out, dom)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_html_escape() {
        let mut v = Vec::new();
        html_escape(&mut v, "a<b & 'c' \"d\">").unwrap();
        assert_eq!(String::from_utf8(v).unwrap(),
                   "a&lt;b &amp; &#39;c&#39; &quot;d&quot;&gt;");
    }

    #[test]
    fn t_plain() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let frag = dom.parse_fragment("<p>Hello <b>world</b><!-- x --></p>")?;
        assert_eq!(frag.to_plain_string(&dom)?, "Hello world");
        Ok(())
    }

    #[test]
    fn t_inner_html() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let doc = dom.document();
        dom.parse_into(doc, "<body><p>a</p>b</body>")?;
        let body = dom.find_tag(doc, "body").unwrap();
        assert_eq!(body.to_html_fragment_string(&dom)?, "<body><p>a</p>b</body>");
        assert_eq!(inner_html_string(&dom, body)?, "<p>a</p>b");
        Ok(())
    }
}
