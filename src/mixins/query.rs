//! Element lookup within a view's own nodes.
//!
//! Selectors: `tag`, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`
//! (value optionally quoted), compounds of those, descendant
//! combinators (whitespace) and comma separated alternatives.

use anyhow::{bail, Result};
use fdom::{Dom, IntoKString, NodeId};
use kstring::KString;

use crate::{fractal::Fractal,
            mixin::{LifecyclePoint, MixinDef},
            registry::ViewId};

pub const NAME: &str = "query";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Simple {
    Tag(KString),
    Id(KString),
    Class(KString),
    Attr(KString, Option<KString>),
}

impl Simple {
    fn matches(&self, dom: &Dom, id: NodeId) -> bool {
        match self {
            Simple::Tag(t) => dom.tag_name(id).map_or(false, |n| n.eq_ignore_ascii_case(t)),
            Simple::Id(v) => dom.attribute(id, "id") == Some(v.as_str()),
            Simple::Class(c) => dom.attribute(id, "class")
                .map_or(false, |cs| cs.split_ascii_whitespace().any(|x| x == c.as_str())),
            Simple::Attr(a, None) => dom.has_attribute(id, a),
            Simple::Attr(a, Some(v)) => dom.attribute(id, a) == Some(v.as_str()),
        }
    }
}

/// Simple selectors that all have to match one element; empty for `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Compound(Vec<Simple>);

impl Compound {
    fn matches(&self, dom: &Dom, id: NodeId) -> bool {
        dom.is_element(id) && self.0.iter().all(|s| s.matches(dom, id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Alternatives, each a chain of compounds from the outermost
    /// ancestor to the subject.
    alternatives: Vec<Vec<Compound>>,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

struct SelectorParser<'t> {
    s: &'t str,
    pos: usize,
}

impl<'t> SelectorParser<'t> {
    fn peek(&self) -> Option<char> {
        self.s[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().map_or(false, |c| c.is_whitespace()) {
            self.bump();
        }
        self.pos != start
    }

    fn name(&mut self) -> Result<KString> {
        let start = self.pos;
        while self.peek().map_or(false, is_name_char) {
            self.bump();
        }
        if start == self.pos {
            bail!("selector {:?}: expecting a name at position {}", self.s, self.pos)
        }
        Ok(self.s[start..self.pos].into_kstring())
    }

    fn attr_value(&mut self) -> Result<KString> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                let start = self.pos;
                while let Some(c) = self.bump() {
                    if c == q {
                        return Ok(self.s[start..self.pos - 1].into_kstring())
                    }
                }
                bail!("selector {:?}: unterminated string", self.s)
            }
            _ => self.name()
        }
    }

    fn compound(&mut self) -> Result<Compound> {
        let mut simples = Vec::new();
        let mut any = false;
        match self.peek() {
            Some('*') => {
                self.bump();
                any = true;
            }
            Some(c) if is_name_char(c) => simples.push(Simple::Tag(self.name()?)),
            _ => ()
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.bump();
                    simples.push(Simple::Id(self.name()?));
                }
                Some('.') => {
                    self.bump();
                    simples.push(Simple::Class(self.name()?));
                }
                Some('[') => {
                    self.bump();
                    self.skip_ws();
                    let attr = self.name()?;
                    self.skip_ws();
                    let value = if self.peek() == Some('=') {
                        self.bump();
                        self.skip_ws();
                        Some(self.attr_value()?)
                    } else {
                        None
                    };
                    self.skip_ws();
                    if self.bump() != Some(']') {
                        bail!("selector {:?}: expecting ']' at position {}", self.s, self.pos)
                    }
                    simples.push(Simple::Attr(attr, value));
                }
                _ => break
            }
        }
        if simples.is_empty() && ! any {
            bail!("selector {:?}: unexpected {:?} at position {}",
                  self.s, self.peek(), self.pos)
        }
        Ok(Compound(simples))
    }
}

impl Selector {
    pub fn parse(s: &str) -> Result<Self> {
        let mut p = SelectorParser { s, pos: 0 };
        let mut alternatives = Vec::new();
        let mut chain = Vec::new();
        p.skip_ws();
        loop {
            chain.push(p.compound()?);
            p.skip_ws();
            match p.peek() {
                None => break,
                Some(',') => {
                    p.bump();
                    p.skip_ws();
                    alternatives.push(std::mem::take(&mut chain));
                }
                Some(_) => ()
            }
        }
        alternatives.push(chain);
        Ok(Selector { alternatives })
    }

    /// Whether `id` matches, with ancestors looked up anywhere in the
    /// document.
    pub fn matches(&self, dom: &Dom, id: NodeId) -> bool {
        self.alternatives.iter().any(|chain| match chain.split_last() {
            Some((subject, ancestors)) =>
                subject.matches(dom, id) && ancestors_match(dom, id, ancestors),
            None => false
        })
    }
}

fn ancestors_match(dom: &Dom, id: NodeId, ancestors: &[Compound]) -> bool {
    let (last, rest) = match ancestors.split_last() {
        Some(x) => x,
        None => return true
    };
    let mut cur = dom.parent(id);
    while let Some(c) = cur {
        if last.matches(dom, c) && ancestors_match(dom, c, rest) {
            return true
        }
        cur = dom.parent(c);
    }
    false
}

/// The elements among a view's fragment nodes, kept up to date on
/// each template initialization.
#[derive(Debug, Default)]
struct FragmentElements(Vec<NodeId>);

pub(crate) fn mixin() -> MixinDef {
    MixinDef::new()
        .hook(LifecyclePoint::InitTemplate, |fx, view, _| {
            let elements: Vec<NodeId> = fx.fragment_nodes(view)?.iter()
                .copied()
                .filter(|n| fx.dom().is_element(*n))
                .collect();
            fx.extension_mut::<FragmentElements>(view)?.0 = elements;
            Ok(())
        })
        .hook(LifecyclePoint::Remove, |fx, view, _| {
            fx.remove_extension::<FragmentElements>(view);
            Ok(())
        })
}

impl Fractal {
    /// The top-level elements of the view's current fragment.
    pub fn fragment_elements(&self, view: ViewId) -> Result<&[NodeId]> {
        self.require_mixin(view, NAME)?;
        Ok(self.extension::<FragmentElements>(view).map_or(&[][..], |e| e.0.as_slice()))
    }

    /// The elements within the view's nodes matching `selector`, in
    /// document order. Child views' nodes are not searched.
    pub fn query(&self, view: ViewId, selector: &str) -> Result<Vec<NodeId>> {
        let selector = Selector::parse(selector)?;
        let clone_attr = self.config.clone_attribute.as_str();
        let mut found = Vec::new();
        for top in self.fragment_elements(view)? {
            if selector.matches(&self.dom, *top) {
                found.push(*top);
            }
            let mut stack: Vec<NodeId> = self.dom.children(*top).iter().rev().copied().collect();
            while let Some(id) = stack.pop() {
                if ! self.dom.is_element(id) || self.dom.attribute(id, clone_attr) == Some("true") {
                    continue
                }
                if selector.matches(&self.dom, id) {
                    found.push(id);
                }
                stack.extend(self.dom.children(id).iter().rev());
            }
        }
        Ok(found)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use fdom::Print;
    use crate::{config::FractalConfig, registry::ViewDef, state::StatePatch};

    #[test]
    fn t_selector_parse() -> Result<()> {
        let s = Selector::parse("ul li.a[data-x='1'], #b")?;
        assert_eq!(s.alternatives.len(), 2);
        assert_eq!(s.alternatives[0].len(), 2);
        assert_eq!(s.alternatives[0][1],
                   Compound(vec![Simple::Tag("li".into()),
                                 Simple::Class("a".into()),
                                 Simple::Attr("data-x".into(), Some("1".into()))]));
        assert_eq!(Selector::parse("*")?.alternatives[0], vec![Compound(vec![])]);
        for bad in ["", "a,", "[x", "a > b", ".", "[x='1]"] {
            assert!(Selector::parse(bad).is_err(), "{bad}");
        }
        Ok(())
    }

    #[test]
    fn t_query() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        let body = fx.load_markup(
            "<body><template data-name=\"list\">\
               <h2 class=\"title big\">T</h2>\
               <ul id=\"items\"><li class=\"fixed\">f</li>\
                 <template data-name=\"item\"><li class=\"item\"><b>i</b></li></template>\
               </ul></template></body>")?;
        fx.scan(body)?;
        fx.define(ViewDef::new("list").mixin(NAME))?;
        let root = fx.root()?;
        let list = fx.append(root, "list", StatePatch::new())?;
        fx.append(list, "item", StatePatch::new())?;

        assert_eq!(fx.fragment_elements(list)?.len(), 2);
        let html = |ids: Vec<NodeId>| -> Result<String> { ids.to_html_fragment_string(fx.dom()) };
        assert_eq!(html(fx.query(list, ".title")?)?,
                   "<h2 class=\"title big\" data-clone=\"true\">T</h2>");
        assert_eq!(html(fx.query(list, "ul#items li")?)?, "<li class=\"fixed\">f</li>");
        assert_eq!(fx.query(list, "li, b")?.len(), 1);
        assert_eq!(fx.query(list, "[data-clone=true]")?.len(), 2);
        assert_eq!(fx.query(list, "*")?.len(), 4);

        // the same nodes after a re-render, not the stale ones
        let before = fx.fragment_elements(list)?.to_vec();
        fx.out(list)?;
        assert_ne!(fx.fragment_elements(list)?, &before[..]);
        assert!(fx.fragment_elements(list)?.iter().all(|n| fx.dom().contains(*n)));
        Ok(())
    }
}
