//! The tree of named template locations ("branches") and the index
//! from dotted paths to branches.

use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};
use fdom::{Arena, Id, IntoKString, NodeId};
use kstring::KString;

use crate::{error::FractalErrorKind, registry::ClassId};

pub type BranchId = Id<Branch>;

#[derive(Debug)]
pub struct Branch {
    name: KString,
    path: KString,
    parent: Option<BranchId>,
    children: BTreeMap<KString, BranchId>,
    view_classes: BTreeMap<KString, ClassId>,
    /// The declared path this branch is an alias of.
    reference_path: Option<KString>,
    /// The canonical branch, once references are resolved.
    reference_target: Option<BranchId>,
    /// The detached template element holding the content; `None` for
    /// references and for the root.
    template: Option<NodeId>,
}

impl Branch {
    pub fn name(&self) -> &str { &self.name }
    pub fn path(&self) -> &str { &self.path }
    pub fn parent(&self) -> Option<BranchId> { self.parent }
    pub fn children(&self) -> &BTreeMap<KString, BranchId> { &self.children }
    pub fn view_classes(&self) -> &BTreeMap<KString, ClassId> { &self.view_classes }
    pub fn reference_path(&self) -> Option<&str> { self.reference_path.as_deref() }
    pub fn reference_target(&self) -> Option<BranchId> { self.reference_target }
    pub fn template(&self) -> Option<NodeId> { self.template }

    pub fn is_reference(&self) -> bool {
        self.reference_path.is_some()
    }
}

/// Join a dotted path prefix and a (possibly dotted) relative path.
pub fn join_path(base: &str, rel: &str) -> KString {
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel.into_kstring(),
        (false, true) => base.into_kstring(),
        (false, false) => format!("{base}.{rel}").into_kstring(),
    }
}

pub struct BranchIndex {
    branches: Arena<Branch>,
    root: BranchId,
    /// Path of each canonical branch -> [canonical, referencing...];
    /// paths of reference branches -> [reference].
    index: BTreeMap<KString, Vec<BranchId>>,
}

impl Default for BranchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BranchIndex {
    pub fn new() -> Self {
        let mut branches = Arena::new();
        let root = branches.insert(Branch {
            name: KString::from_static(""),
            path: KString::from_static(""),
            parent: None,
            children: BTreeMap::new(),
            view_classes: BTreeMap::new(),
            reference_path: None,
            reference_target: None,
            template: None,
        });
        BranchIndex { branches, root, index: BTreeMap::new() }
    }

    pub fn root(&self) -> BranchId {
        self.root
    }

    /// Number of branches, not counting the root.
    pub fn len(&self) -> usize {
        self.branches.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: BranchId) -> Result<&Branch> {
        self.branches.get(id).ok_or_else(|| anyhow!("invalid branch id {id:?}"))
    }

    fn get_mut(&mut self, id: BranchId) -> Result<&mut Branch> {
        self.branches.get_mut(id).ok_or_else(|| anyhow!("invalid branch id {id:?}"))
    }

    /// The branch whose content and children `id` shares.
    pub fn canonical(&self, id: BranchId) -> Result<BranchId> {
        Ok(self.get(id)?.reference_target.unwrap_or(id))
    }

    /// The branches registered under `path`, canonical first.
    pub fn index_of(&self, path: &str) -> &[BranchId] {
        self.index.get(path).map_or(&[], |v| v.as_slice())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(|k| k.as_str())
    }

    /// Create a branch below `parent`, failing if the name is taken at
    /// that level.
    pub fn insert_child(
        &mut self,
        parent: BranchId,
        name: &str,
        reference_path: Option<&str>,
        template: Option<NodeId>,
    ) -> Result<BranchId> {
        let parent_branch = self.get(parent)?;
        let path = join_path(parent_branch.path(), name);
        if parent_branch.children.contains_key(name) {
            return FractalErrorKind::DuplicateBranch {
                path: parent_branch.path.clone(),
                name: name.into_kstring(),
            }.err();
        }
        let id = self.branches.insert(Branch {
            name: name.into_kstring(),
            path: path.clone(),
            parent: Some(parent),
            children: BTreeMap::new(),
            view_classes: BTreeMap::new(),
            reference_path: reference_path.map(|s| s.into_kstring()),
            reference_target: None,
            template,
        });
        self.get_mut(parent)?.children.insert(name.into_kstring(), id);
        self.index.insert(path, vec![id]);
        Ok(id)
    }

    /// Point every reference branch at its canonical branch, following
    /// chains of references, and list it in the canonical branch's
    /// index entry.
    pub fn resolve_references(&mut self) -> Result<()> {
        let refs: Vec<BranchId> = self.branches.iter()
            .filter(|(_, b)| b.is_reference() && b.reference_target.is_none())
            .map(|(id, _)| id)
            .collect();
        for r in refs {
            let mut seen = HashSet::new();
            let mut cur = r;
            let target = loop {
                if ! seen.insert(cur) {
                    return FractalErrorKind::ReferenceCycle {
                        path: self.get(r)?.path.clone()
                    }.err();
                }
                let b = self.get(cur)?;
                let target_path = match &b.reference_path {
                    Some(p) => p,
                    None => break cur
                };
                cur = match self.index.get(target_path).and_then(|v| v.first()) {
                    Some(id) => *id,
                    None => return FractalErrorKind::ReferenceNotFound {
                        path: b.path.clone(),
                        target: target_path.clone(),
                    }.err()
                };
            };
            self.get_mut(r)?.reference_target = Some(target);
            let target_path = self.get(target)?.path.clone();
            self.index.entry(target_path).or_default().push(r);
        }
        Ok(())
    }

    /// The child named `name` of `id`, looked up via the reference
    /// target if `id` has no such child of its own.
    pub fn child(&self, id: BranchId, name: &str) -> Result<Option<BranchId>> {
        let b = self.get(id)?;
        if let Some(c) = b.children.get(name) {
            return Ok(Some(*c))
        }
        if let Some(target) = b.reference_target {
            return Ok(self.get(target)?.children.get(name).copied())
        }
        Ok(None)
    }

    /// Children of `id`, or those of its reference target.
    pub fn child_branches(&self, id: BranchId) -> Result<Vec<BranchId>> {
        let b = self.get(id)?;
        if b.children.is_empty() {
            if let Some(target) = b.reference_target {
                return Ok(self.get(target)?.children.values().copied().collect())
            }
        }
        Ok(b.children.values().copied().collect())
    }

    /// Walk the segments of a dotted path from the root, following
    /// references where a branch has no child of its own.
    pub fn get_branch(&self, path: &str) -> Result<BranchId> {
        let mut cur = self.root;
        for segment in path.split('.').filter(|s| ! s.is_empty()) {
            cur = self.child(cur, segment)?.ok_or_else(
                || FractalErrorKind::TemplateNotFound { path: path.into_kstring() }.error())?;
        }
        Ok(cur)
    }

    /// A view class registered on `id` or on its reference target.
    pub fn view_class(&self, id: BranchId, name: &str) -> Result<Option<ClassId>> {
        let b = self.get(id)?;
        if let Some(c) = b.view_classes.get(name) {
            return Ok(Some(*c))
        }
        if let Some(target) = b.reference_target {
            return Ok(self.get(target)?.view_classes.get(name).copied())
        }
        Ok(None)
    }

    /// Register `class` as `name` on `id` and on all branches sharing
    /// its content.
    pub fn register_view(&mut self, id: BranchId, name: &str, class: ClassId) -> Result<()> {
        let path = self.get(id)?.path.clone();
        let mut targets: Vec<BranchId> = self.index_of(&path).to_vec();
        if ! targets.contains(&id) {
            targets.insert(0, id);
        }
        for t in &targets {
            if self.get(*t)?.view_classes.contains_key(name) {
                return FractalErrorKind::DuplicateView {
                    path: self.get(*t)?.path.clone(),
                    name: name.into_kstring(),
                }.err();
            }
        }
        for t in targets {
            self.get_mut(t)?.view_classes.insert(name.into_kstring(), class);
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_kind;

    fn tree() -> Result<BranchIndex> {
        let mut ix = BranchIndex::new();
        let root = ix.root();
        let list = ix.insert_child(root, "list", None, None)?;
        ix.insert_child(list, "item", None, None)?;
        ix.insert_child(root, "alias", Some("list"), None)?;
        ix.insert_child(root, "alias2", Some("alias"), None)?;
        ix.resolve_references()?;
        Ok(ix)
    }

    #[test]
    fn t_paths() -> Result<()> {
        let ix = tree()?;
        let list = ix.get_branch("list")?;
        let item = ix.get_branch("list.item")?;
        assert_eq!(ix.get(item)?.path(), "list.item");
        assert_eq!(ix.get(list)?.children().get("item"), Some(&item));
        assert_eq!(ix.get_branch("")?, ix.root());
        assert_eq!(ix.paths().collect::<Vec<_>>(),
                   vec!["alias", "alias2", "list", "list.item"]);
        Ok(())
    }

    #[test]
    fn t_references() -> Result<()> {
        let ix = tree()?;
        let list = ix.get_branch("list")?;
        let alias = ix.get_branch("alias")?;
        let alias2 = ix.get_branch("alias2")?;
        assert_eq!(ix.get(alias)?.reference_target(), Some(list));
        // chains resolve to the canonical branch
        assert_eq!(ix.get(alias2)?.reference_target(), Some(list));
        assert_eq!(ix.get(list)?.reference_target(), None);
        assert_eq!(ix.index_of("list"), &[list, alias, alias2]);
        // children are reachable through the alias
        assert_eq!(ix.get_branch("alias.item")?, ix.get_branch("list.item")?);
        Ok(())
    }

    #[test]
    fn t_errors() -> Result<()> {
        let mut ix = BranchIndex::new();
        let root = ix.root();
        ix.insert_child(root, "a", None, None)?;
        let e = ix.insert_child(root, "a", None, None).err().unwrap();
        assert_eq!(e.to_string(), "duplicate template name \"a\" in \"\"");
        let e = ix.get_branch("a.b").err().unwrap();
        assert!(matches!(error_kind(&e), Some(FractalErrorKind::TemplateNotFound { .. })));

        ix.insert_child(root, "r", Some("nowhere"), None)?;
        let e = ix.resolve_references().err().unwrap();
        assert_eq!(e.to_string(), "template \"r\" references \"nowhere\", which does not exist");

        let mut ix = BranchIndex::new();
        let root = ix.root();
        ix.insert_child(root, "x", Some("y"), None)?;
        ix.insert_child(root, "y", Some("x"), None)?;
        let e = ix.resolve_references().err().unwrap();
        assert!(matches!(error_kind(&e), Some(FractalErrorKind::ReferenceCycle { .. })));
        Ok(())
    }
}
