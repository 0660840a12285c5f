//! The mutable node tree. All nodes live in one `Arena` owned by the
//! `Dom`; nodes refer to each other by `NodeId`.

use std::collections::HashSet;

use anyhow::{anyhow, bail, Result};
use kstring::KString;
use lazy_static::lazy_static;

use crate::{arena::{Arena, Id}, kstr::IntoKString};

pub type NodeId = Id<Node>;

pub const TEMPLATE_TAG: &str = "template";

lazy_static!{
    /// Elements without closing tag.
    pub static ref VOID_ELEMENTS: HashSet<&'static str> = [
        "area", "base", "br", "col", "embed", "hr", "img", "input",
        "link", "meta", "source", "track", "wbr",
    ].into_iter().collect();
}

/// How `<template>` elements hold their content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateMode {
    /// Content goes into a separate fragment, like
    /// `HTMLTemplateElement.content`.
    Native,
    /// Content stays as ordinary children of the element.
    Inline,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: KString,
    pub attrs: Vec<(KString, KString)>,
    /// The content fragment of a `<template>` in `TemplateMode::Native`.
    pub content: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Fragment,
    Element(Element),
    Text(KString),
    Comment(KString),
}

#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn kind(&self) -> &NodeKind { &self.kind }
    pub fn parent(&self) -> Option<NodeId> { self.parent }
    pub fn children(&self) -> &[NodeId] { &self.children }

    pub fn as_element(&self) -> Option<&Element> {
        match &self.kind {
            NodeKind::Element(e) => Some(e),
            _ => None
        }
    }

    fn can_have_children(&self) -> bool {
        match &self.kind {
            NodeKind::Document | NodeKind::Fragment | NodeKind::Element(_) => true,
            NodeKind::Text(_) | NodeKind::Comment(_) => false,
        }
    }
}

pub struct Dom {
    nodes: Arena<Node>,
    document: NodeId,
    template_mode: TemplateMode,
}

impl Dom {
    pub fn new(template_mode: TemplateMode) -> Self {
        let mut nodes = Arena::new();
        let document = nodes.insert(Node {
            kind: NodeKind::Document,
            parent: None,
            children: Vec::new()
        });
        Dom { nodes, document, template_mode }
    }

    pub fn document(&self) -> NodeId {
        self.document
    }

    pub fn template_mode(&self) -> TemplateMode {
        self.template_mode
    }

    /// Number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id).ok_or_else(|| anyhow!("stale node id {id:?}"))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id).ok_or_else(|| anyhow!("stale node id {id:?}"))
    }

    fn new_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.insert(Node { kind, parent: None, children: Vec::new() })
    }

    // ------------------------------------------------------------------
    // Creation

    pub fn create_element(&mut self, tag: impl IntoKString) -> NodeId {
        let tag = tag.into_kstring();
        let content =
            if self.template_mode == TemplateMode::Native
                && tag.eq_ignore_ascii_case(TEMPLATE_TAG)
            {
                Some(self.create_fragment())
            } else {
                None
            };
        self.new_node(NodeKind::Element(Element { tag, attrs: Vec::new(), content }))
    }

    pub fn create_text(&mut self, s: impl IntoKString) -> NodeId {
        self.new_node(NodeKind::Text(s.into_kstring()))
    }

    pub fn create_comment(&mut self, s: impl IntoKString) -> NodeId {
        self.new_node(NodeKind::Comment(s.into_kstring()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.new_node(NodeKind::Fragment)
    }

    // ------------------------------------------------------------------
    // Inspection

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.nodes.get(id)?.as_element()
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.tag.as_str())
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn is_tag(&self, id: NodeId, tag: &str) -> bool {
        self.tag_name(id).map_or(false, |t| t.eq_ignore_ascii_case(tag))
    }

    pub fn is_fragment(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id).map(|n| &n.kind), Some(NodeKind::Fragment))
    }

    /// The value of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Text(s) => Some(s.as_str()),
            _ => None
        }
    }

    /// Set the value of a text or comment node.
    pub fn set_text(&mut self, id: NodeId, s: impl IntoKString) -> Result<()> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Text(t) | NodeKind::Comment(t) => {
                *t = s.into_kstring();
                Ok(())
            }
            other => bail!("set_text on a non-text node: {other:?}")
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|(k, _)| k.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.attribute(id, name).is_some()
    }

    /// All attributes in insertion order; empty for non-elements.
    pub fn attributes(&self, id: NodeId) -> &[(KString, KString)] {
        self.element(id).map_or(&[], |e| e.attrs.as_slice())
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(e) => Ok(e),
            other => bail!("not an element: {other:?}")
        }
    }

    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: impl IntoKString,
        value: impl IntoKString
    ) -> Result<()> {
        let name = name.into_kstring();
        let value = value.into_kstring();
        let e = self.element_mut(id)?;
        match e.attrs.iter().position(|(k, _)| *k == name) {
            Some(i) => e.attrs[i].1 = value,
            None => e.attrs.push((name, value)),
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<Option<KString>> {
        let e = self.element_mut(id)?;
        Ok(e.attrs.iter().position(|(k, _)| k.as_str() == name)
           .map(|i| e.attrs.remove(i).1))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent
    }

    /// Empty for stale ids and childless nodes.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).last().copied()
    }

    fn sibling_position(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(id)?;
        let i = self.children(parent).iter().position(|c| *c == id)?;
        Some((parent, i))
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, i) = self.sibling_position(id)?;
        self.children(parent).get(i + 1).copied()
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, i) = self.sibling_position(id)?;
        if i == 0 {
            None
        } else {
            self.children(parent).get(i - 1).copied()
        }
    }

    pub fn template_content(&self, id: NodeId) -> Option<NodeId> {
        self.element(id)?.content
    }

    /// Where a template's content lives: its content fragment if it
    /// has one, the element itself otherwise.
    pub fn content_root(&self, id: NodeId) -> NodeId {
        self.template_content(id).unwrap_or(id)
    }

    /// Whether `ancestor` is `id` or one of its ancestors.
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c == ancestor {
                return true
            }
            cur = self.parent(c);
        }
        false
    }

    /// Pre-order walk below `root` (excluding `root` itself). Does not
    /// enter template content fragments.
    pub fn descendants(&self, root: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.children(root).to_vec();
        stack.reverse();
        Descendants { dom: self, stack }
    }

    // ------------------------------------------------------------------
    // Mutation

    /// Remove `id` from its parent, if it has one.
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        if let Some(parent) = self.node(id)?.parent {
            let p = self.node_mut(parent)?;
            p.children.retain(|c| *c != id);
            self.node_mut(id)?.parent = None;
        }
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.node(child)?.parent != Some(parent) {
            bail!("remove_child: {child:?} is not a child of {parent:?}")
        }
        self.detach(child)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `before` (at the end if
    /// `None`). Inserting a fragment moves all of its children,
    /// leaving it empty.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>
    ) -> Result<()> {
        if ! self.node(parent)?.can_have_children() {
            bail!("insert_before: {parent:?} can't have children")
        }
        if let Some(b) = before {
            if self.node(b)?.parent != Some(parent) {
                bail!("insert_before: anchor {b:?} is not a child of {parent:?}")
            }
        }
        if self.is_fragment(child) {
            let kids = self.children(child).to_vec();
            for kid in kids {
                self.insert_single(parent, kid, before)?;
            }
            Ok(())
        } else {
            self.insert_single(parent, child, before)
        }
    }

    fn insert_single(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>
    ) -> Result<()> {
        if self.is_inclusive_ancestor(child, parent) {
            bail!("insert_before: inserting {child:?} into {parent:?} would create a cycle")
        }
        let before = if before == Some(child) {
            self.next_sibling(child)
        } else {
            before
        };
        self.detach(child)?;
        let p = self.node_mut(parent)?;
        let pos = match before {
            Some(b) => p.children.iter().position(|c| *c == b)
                .ok_or_else(|| anyhow!("insert_before: anchor {b:?} vanished"))?,
            None => p.children.len()
        };
        p.children.insert(pos, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Put `new` in the place of `old`, detaching `old`.
    pub fn replace_child(&mut self, parent: NodeId, new: NodeId, old: NodeId) -> Result<()> {
        if self.node(old)?.parent != Some(parent) {
            bail!("replace_child: {old:?} is not a child of {parent:?}")
        }
        if new == old {
            return Ok(())
        }
        self.insert_before(parent, new, Some(old))?;
        self.detach(old)
    }

    /// A copy of `id` that is not attached anywhere. A deep clone of a
    /// template element also clones its content.
    pub fn clone_node(&mut self, id: NodeId, deep: bool) -> Result<NodeId> {
        let kind = self.node(id)?.kind.clone();
        let kind = match kind {
            NodeKind::Document => bail!("can't clone the document node"),
            NodeKind::Element(mut e) => {
                e.content = match e.content {
                    Some(content) if deep => Some(self.clone_node(content, true)?),
                    Some(_) => Some(self.create_fragment()),
                    None => None
                };
                NodeKind::Element(e)
            }
            k => k
        };
        let new = self.new_node(kind);
        if deep {
            let kids = self.children(id).to_vec();
            for kid in kids {
                let c = self.clone_node(kid, true)?;
                self.insert_single(new, c, None)?;
            }
        }
        Ok(new)
    }

    /// Free a detached subtree; its ids become stale.
    pub fn release(&mut self, id: NodeId) -> Result<()> {
        if self.node(id)?.parent.is_some() {
            bail!("release: {id:?} is still attached")
        }
        if id == self.document {
            bail!("release: can't release the document node")
        }
        self.release_unchecked(id);
        Ok(())
    }

    fn release_unchecked(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.remove(id) {
            if let NodeKind::Element(Element { content: Some(content), .. }) = node.kind {
                self.release_unchecked(content);
            }
            for kid in node.children {
                self.release_unchecked(kid);
            }
        }
    }
}

pub struct Descendants<'d> {
    dom: &'d Dom,
    stack: Vec<NodeId>,
}

impl<'d> Iterator for Descendants<'d> {
    type Item = NodeId;
    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        let kids = self.dom.children(id);
        self.stack.extend(kids.iter().rev());
        Some(id)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::Print;

    fn html(dom: &Dom, id: NodeId) -> String {
        id.to_html_fragment_string(dom).unwrap()
    }

    #[test]
    fn t_insert_before_and_siblings() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let ul = dom.create_element("ul");
        let a = dom.create_element("li");
        let b = dom.create_element("li");
        dom.set_attribute(a, "id", "a")?;
        dom.set_attribute(b, "id", "b")?;
        dom.append_child(ul, b)?;
        dom.insert_before(ul, a, Some(b))?;
        assert_eq!(html(&dom, ul), "<ul><li id=\"a\"></li><li id=\"b\"></li></ul>");
        assert_eq!(dom.next_sibling(a), Some(b));
        assert_eq!(dom.previous_sibling(b), Some(a));
        assert_eq!(dom.next_sibling(b), None);
        // moving a node
        dom.append_child(ul, a)?;
        assert_eq!(dom.children(ul), &[b, a]);
        // inserting before itself is a no-op
        dom.insert_before(ul, a, Some(a))?;
        assert_eq!(dom.children(ul), &[b, a]);
        Ok(())
    }

    #[test]
    fn t_fragment_insertion_empties_fragment() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let div = dom.create_element("div");
        let frag = dom.create_fragment();
        let t1 = dom.create_text("one");
        let t2 = dom.create_text("two");
        dom.append_child(frag, t1)?;
        dom.append_child(frag, t2)?;
        dom.append_child(div, frag)?;
        assert!(dom.children(frag).is_empty());
        assert_eq!(dom.children(div), &[t1, t2]);
        assert_eq!(dom.parent(t1), Some(div));
        Ok(())
    }

    #[test]
    fn t_errors() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let outer = dom.create_element("div");
        let inner = dom.create_element("div");
        let stray = dom.create_element("p");
        dom.append_child(outer, inner)?;
        assert_eq!(
            dom.append_child(inner, outer).err().unwrap().to_string(),
            format!("insert_before: inserting {outer:?} into {inner:?} would create a cycle"));
        assert!(dom.insert_before(outer, stray, Some(stray)).is_err());
        let text = dom.create_text("x");
        assert!(dom.append_child(text, stray).is_err());
        assert!(dom.release(inner).is_err());
        Ok(())
    }

    #[test]
    fn t_clone_template_deep() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let tpl = dom.create_element("template");
        let content = dom.template_content(tpl).unwrap();
        let p = dom.create_element("p");
        dom.append_child(content, p)?;
        let copy = dom.clone_node(tpl, true)?;
        let copy_content = dom.template_content(copy).unwrap();
        assert_ne!(copy_content, content);
        assert_eq!(dom.children(copy_content).len(), 1);
        assert_eq!(html(&dom, copy), "<template><p></p></template>");
        let shallow = dom.clone_node(tpl, false)?;
        assert_eq!(html(&dom, shallow), "<template></template>");
        Ok(())
    }

    #[test]
    fn t_release() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let before = dom.node_count();
        let div = dom.create_element("div");
        let span = dom.create_element("span");
        dom.append_child(div, span)?;
        dom.release(div)?;
        assert!(! dom.contains(span));
        assert_eq!(dom.node_count(), before);
        Ok(())
    }

    #[test]
    fn t_descendants_skip_template_content() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let root = dom.create_fragment();
        dom.parse_into(root, "<div><template><p></p></template><b></b></div>")?;
        let tags: Vec<_> = dom.descendants(root)
            .filter_map(|id| dom.tag_name(id).map(String::from))
            .collect();
        assert_eq!(tags, vec!["div", "template", "b"]);
        Ok(())
    }
}
