//! Build nodes from markup, via the `html5gum` tokenizer.

use anyhow::{bail, Result};
use html5gum::{HtmlString, Token};
use kstring::KString;

use crate::dom::{Dom, NodeId, NodeKind, VOID_ELEMENTS};

/// This can't be replaced with `IntoKString`, because it can fail.
fn kstring(s: HtmlString) -> Result<KString> {
    Ok(KString::from_string(String::from_utf8(s.0)?))
}

struct Frame {
    tag: Option<KString>,
    // where children go: the element, or its template content
    target: NodeId,
}

impl Dom {
    /// Parse `markup` and append the resulting nodes to `parent`.
    /// Stricter than a browser: end tags must match and elements must
    /// be closed.
    pub fn parse_into(&mut self, parent: NodeId, markup: &str) -> Result<()> {
        let mut context = vec![Frame { tag: None, target: parent }];
        for token in html5gum::Tokenizer::new(markup).infallible() {
            let target = match context.last() {
                Some(frame) => frame.target,
                None => bail!("parser context stack is empty")
            };
            match token {
                Token::StartTag(starttag) => {
                    let name = kstring(starttag.name)?;
                    let el = self.create_element(&name);
                    for (k, v) in starttag.attributes {
                        self.set_attribute(el, kstring(k)?, kstring(v)?)?;
                    }
                    self.append_child(target, el)?;
                    if ! (starttag.self_closing || VOID_ELEMENTS.contains(name.as_str())) {
                        context.push(Frame {
                            tag: Some(name),
                            target: self.content_root(el)
                        });
                    }
                }
                Token::EndTag(endtag) => {
                    let name: &str = std::str::from_utf8(&**endtag.name)?;
                    if VOID_ELEMENTS.contains(name) {
                        continue;
                    }
                    let open = context.last().and_then(|f| f.tag.clone());
                    match open {
                        Some(open) if open.as_str() == name => {
                            context.pop();
                        }
                        Some(open) =>
                            bail!("mismatched end tag </{name}>, expecting </{open}>"),
                        None =>
                            bail!("end tag </{name}> without start tag"),
                    }
                }
                Token::String(s) => {
                    let s = kstring(s)?;
                    // the tokenizer may deliver text in pieces
                    let last_text = self.last_child(target)
                        .filter(|id| self.text(*id).is_some());
                    if let Some(last) = last_text {
                        let joined = format!("{}{}", self.text(last).unwrap_or(""), s);
                        self.set_text(last, joined)?;
                    } else {
                        let t = self.create_text(s);
                        self.append_child(target, t)?;
                    }
                }
                Token::Comment(s) => {
                    let c = self.create_comment(kstring(s)?);
                    self.append_child(target, c)?;
                }
                Token::Doctype(_) => (),
                Token::Error(e) =>
                    bail!("HTML5 parsing error: {e}"),
            }
        }
        if let Some(Frame { tag: Some(open), .. }) = context.last() {
            bail!("unclosed element <{open}>")
        }
        Ok(())
    }

    /// Parse `markup` into a new, detached fragment.
    pub fn parse_fragment(&mut self, markup: &str) -> Result<NodeId> {
        let frag = self.create_fragment();
        self.parse_into(frag, markup)?;
        Ok(frag)
    }

    /// The first element with tag `tag` below `root` (pre-order).
    pub fn find_tag(&self, root: NodeId, tag: &str) -> Option<NodeId> {
        self.descendants(root).find(|id| self.is_tag(*id, tag))
    }

    /// Concatenated text below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut s = String::new();
        for d in self.descendants(id) {
            if let Ok(NodeKind::Text(t)) = self.node(d).map(|n| n.kind()) {
                s.push_str(t);
            }
        }
        s
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Print, TemplateMode};

    fn roundtrip(mode: TemplateMode, s: &str) -> Result<String> {
        let mut dom = Dom::new(mode);
        let frag = dom.parse_fragment(s)?;
        frag.to_html_fragment_string(&dom)
    }

    #[test]
    fn t_parse() -> Result<()> {
        assert_eq!(roundtrip(TemplateMode::Native,
                             "<ul class=\"x\"><li>a &amp; b</li><li><br>c</li></ul>")?,
                   "<ul class=\"x\"><li>a &amp; b</li><li><br>c</li></ul>");
        assert_eq!(roundtrip(TemplateMode::Native, "<!-- hi --><p/>")?,
                   "<!-- hi --><p></p>");
        Ok(())
    }

    #[test]
    fn t_template_content() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let frag = dom.parse_fragment(
            "<div><template data-name=\"a\"><p>x</p></template></div>")?;
        let tpl = dom.find_tag(frag, "template").unwrap();
        assert!(dom.children(tpl).is_empty());
        let content = dom.template_content(tpl).unwrap();
        assert_eq!(dom.text_content(content), "x");
        assert_eq!(frag.to_html_fragment_string(&dom)?,
                   "<div><template data-name=\"a\"><p>x</p></template></div>");

        let mut dom = Dom::new(TemplateMode::Inline);
        let frag = dom.parse_fragment("<template><p>x</p></template>")?;
        let tpl = dom.find_tag(frag, "template").unwrap();
        assert_eq!(dom.template_content(tpl), None);
        assert_eq!(dom.children(tpl).len(), 1);
        Ok(())
    }

    #[test]
    fn t_parse_errors() {
        let e = roundtrip(TemplateMode::Native, "<div><p></div>").err().unwrap();
        assert_eq!(e.to_string(), "mismatched end tag </div>, expecting </p>");
        let e = roundtrip(TemplateMode::Native, "</p>").err().unwrap();
        assert_eq!(e.to_string(), "end tag </p> without start tag");
        let e = roundtrip(TemplateMode::Native, "<div>").err().unwrap();
        assert_eq!(e.to_string(), "unclosed element <div>");
    }
}
