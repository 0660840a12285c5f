//! View instances: live occurrences of view classes, each owning a
//! clone of its template's content, a state and child views.

use std::{any::{Any, TypeId}, collections::HashMap};

use anyhow::{anyhow, Result};
use fdom::{IntoKString, NodeId};
use serde_json::Value;

use crate::{branch::{join_path, BranchId},
            error::FractalErrorKind,
            fractal::Fractal,
            mixin::{HookArgs, LifecyclePoint},
            registry::{split_view_path, ClassId, ViewDef, ViewId},
            scanner::find_templates,
            state::{diff, DefaultState, Patch, State, StatePatch, UpdateOptions},
            trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    New,
    Initialized,
    Rendered,
    Mounted,
    Emptied,
    /// Reported for ids of views that no longer exist.
    Destroyed,
}

/// Where `add` puts the new view, relative to the local template
/// marker in the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Right before the marker.
    Before,
    /// Right after the marker.
    After,
    /// First in the marker's parent node.
    Prepend,
    /// Last in the marker's parent node.
    Append,
}

/// The template nodes a view works with.
#[derive(Debug, Clone)]
pub struct TemplateRef {
    /// The marker in the parent's nodes this view is placed relative
    /// to.
    pub local: NodeId,
    /// The template holding the content, if the marker refers to one.
    pub canonical: Option<NodeId>,
    /// The fragment the content is cloned into; empty once inserted.
    pub fragment: Option<NodeId>,
    /// The top-level nodes of the clone, kept after insertion.
    pub fragment_nodes: Option<Vec<NodeId>>,
}

pub struct ViewInstance {
    pub(crate) class: ClassId,
    /// The branch this view was attached through; differs from the
    /// class's branch when added via a reference.
    pub(crate) branch: BranchId,
    pub(crate) parent: Option<ViewId>,
    pub(crate) children: Vec<ViewId>,
    pub(crate) state: State,
    pub(crate) template: Option<TemplateRef>,
    pub(crate) phase: Phase,
    pub(crate) rendered: bool,
    pub(crate) mounted: bool,
    extensions: HashMap<TypeId, Box<dyn Any>>,
}

impl ViewInstance {
    fn new(class: ClassId, branch: BranchId, parent: ViewId) -> Self {
        ViewInstance {
            class,
            branch,
            parent: Some(parent),
            children: Vec::new(),
            state: State::new(),
            template: None,
            phase: Phase::New,
            rendered: false,
            mounted: false,
            extensions: HashMap::new(),
        }
    }

    /// The pseudo view standing for the scanned root element: always
    /// mounted, its only node is the root element.
    pub(crate) fn root(class: ClassId, branch: BranchId, root: NodeId) -> Self {
        ViewInstance {
            class,
            branch,
            parent: None,
            children: Vec::new(),
            state: State::new(),
            template: Some(TemplateRef {
                local: root,
                canonical: None,
                fragment: None,
                fragment_nodes: Some(vec![root]),
            }),
            phase: Phase::Mounted,
            rendered: true,
            mounted: true,
            extensions: HashMap::new(),
        }
    }

    pub fn class(&self) -> ClassId { self.class }
    pub fn branch(&self) -> BranchId { self.branch }
    pub fn parent(&self) -> Option<ViewId> { self.parent }
    pub fn children(&self) -> &[ViewId] { &self.children }
    pub fn state(&self) -> &State { &self.state }
    pub fn template(&self) -> Option<&TemplateRef> { self.template.as_ref() }
    pub fn is_rendered(&self) -> bool { self.rendered }
    pub fn is_mounted(&self) -> bool { self.mounted }

    pub fn fragment_nodes(&self) -> &[NodeId] {
        self.template.as_ref()
            .and_then(|t| t.fragment_nodes.as_deref())
            .unwrap_or(&[])
    }
}

impl Fractal {
    pub fn instance(&self, view: ViewId) -> Result<&ViewInstance> {
        self.views.get(view).ok_or_else(
            || FractalErrorKind::StaleView { view: format!("{view:?}") }.error())
    }

    fn instance_mut(&mut self, view: ViewId) -> Result<&mut ViewInstance> {
        self.views.get_mut(view).ok_or_else(
            || FractalErrorKind::StaleView { view: format!("{view:?}") }.error())
    }

    pub fn is_alive(&self, view: ViewId) -> bool {
        self.views.contains(view)
    }

    pub fn phase(&self, view: ViewId) -> Phase {
        self.views.get(view).map_or(Phase::Destroyed, |v| v.phase)
    }

    pub fn state(&self, view: ViewId) -> Result<&State> {
        Ok(&self.instance(view)?.state)
    }

    /// A state value, `Null` if absent.
    pub fn state_value(&self, view: ViewId, key: &str) -> Result<&Value> {
        Ok(self.instance(view)?.state.get(key).unwrap_or(&Value::Null))
    }

    pub fn children(&self, view: ViewId) -> Result<&[ViewId]> {
        Ok(&self.instance(view)?.children)
    }

    pub fn parent(&self, view: ViewId) -> Result<Option<ViewId>> {
        Ok(self.instance(view)?.parent)
    }

    pub fn view_class(&self, view: ViewId) -> Result<ClassId> {
        Ok(self.instance(view)?.class)
    }

    pub fn fragment_nodes(&self, view: ViewId) -> Result<&[NodeId]> {
        Ok(self.instance(view)?.fragment_nodes())
    }

    /// Typed per-view storage, created on first use.
    pub fn extension_mut<T: Any + Default>(&mut self, view: ViewId) -> Result<&mut T> {
        let inst = self.instance_mut(view)?;
        inst.extensions.entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
            .ok_or_else(|| anyhow!("extension type mismatch"))
    }

    pub fn extension<T: Any>(&self, view: ViewId) -> Option<&T> {
        self.views.get(view)?
            .extensions.get(&TypeId::of::<T>())?
            .downcast_ref::<T>()
    }

    pub fn remove_extension<T: Any>(&mut self, view: ViewId) -> Option<T> {
        let b = self.views.get_mut(view)?.extensions.remove(&TypeId::of::<T>())?;
        b.downcast::<T>().ok().map(|b| *b)
    }

    // ------------------------------------------------------------------
    // Hooks and methods

    /// Run the hooks of `point`, then its callback. Stops when the
    /// view is destroyed on the way.
    pub(crate) fn call_point(
        &mut self,
        view: ViewId,
        point: LifecyclePoint,
        args: &mut HookArgs<'_>
    ) -> Result<()> {
        let (hooks, callback) = {
            let class = self.class_of(view)?;
            (class.hooks.get(point), class.callbacks.get(&point).cloned())
        };
        for h in hooks {
            if ! self.is_alive(view) {
                return Ok(())
            }
            h(self, view, args)?;
        }
        if let Some(cb) = callback {
            if self.is_alive(view) {
                cb(self, view, args)?;
            }
        }
        Ok(())
    }

    pub fn has_method(&self, view: ViewId, name: &str) -> bool {
        self.class_of(view).map_or(false, |c| c.has_method(name))
    }

    /// Call a method from the view's class or its mixins.
    pub fn call(&mut self, view: ViewId, name: &str, args: &[Value]) -> Result<Value> {
        let class = self.class_of(view)?;
        let m = class.methods.get(name).cloned().ok_or_else(
            || FractalErrorKind::UnknownMethod {
                class: class.name.clone(),
                name: name.into_kstring()
            }.error())?;
        m(self, view, args)
    }

    // ------------------------------------------------------------------
    // State

    fn resolve_default_state(&self, view: ViewId) -> Result<State> {
        match self.class_of(view)?.default_state.clone() {
            Some(DefaultState::Map(m)) => Ok(m),
            Some(DefaultState::Computed(f)) => f(self, view),
            None => Ok(State::new()),
        }
    }

    /// Merge `patch` into the view's state. Once the view has been
    /// rendered, changed keys are passed to `AfterStateChange`.
    pub fn update_state(&mut self, view: ViewId, patch: StatePatch) -> Result<()> {
        self.update_state_with(view, patch, UpdateOptions::default())
    }

    pub fn update_state_with(
        &mut self,
        view: ViewId,
        mut patch: StatePatch,
        options: UpdateOptions
    ) -> Result<()> {
        let mut defaults = if options.reset {
            Some(self.resolve_default_state(view)?)
        } else {
            None
        };
        let inst = self.instance_mut(view)?;
        let had_state = inst.phase != Phase::New;
        let old_state = if options.reset {
            std::mem::replace(&mut inst.state, defaults.clone().unwrap_or_default())
        } else {
            inst.state.clone()
        };

        self.call_point(view, LifecyclePoint::BeforeStateChange,
                        &mut HookArgs::BeforeStateChange { patch: &mut patch, options })?;

        if patch.has_unset() && defaults.is_none() {
            defaults = Some(self.resolve_default_state(view)?);
        }
        let inst = self.instance_mut(view)?;
        for (k, p) in patch.iter() {
            let value = match p {
                Patch::Set(v) => v.clone(),
                Patch::Unset => defaults.as_ref()
                    .and_then(|d| d.get(k).cloned())
                    .unwrap_or(Value::Null),
            };
            inst.state.insert(k.to_string(), value);
        }

        if had_state && inst.rendered {
            let changes = diff(&old_state, &inst.state);
            if ! changes.is_empty() {
                trace!("{view:?}: state change {}", Value::Object(changes.clone()));
                self.call_point(view, LifecyclePoint::AfterStateChange,
                                &mut HookArgs::AfterStateChange { diff: &changes, options })?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Templates

    /// The template marker named `name` among the nodes of `parent`.
    fn local_template(&self, parent: ViewId, name: &str) -> Result<NodeId> {
        let nodes = self.instance(parent)?.fragment_nodes();
        for node in nodes {
            if ! self.dom.is_element(*node) {
                continue
            }
            let mut found = find_templates(&self.config, &self.dom, *node, Some(name));
            if self.config.is_fragment_element(&self.dom, *node)
                && self.dom.attribute(*node, &self.config.name_attribute) == Some(name)
            {
                found.insert(0, *node);
            }
            match found.len() {
                0 => (),
                1 => return Ok(found[0]),
                _ => return FractalErrorKind::TemplateNotUnique { name: name.into_kstring() }.err(),
            }
        }
        FractalErrorKind::NoLocalTemplate { name: name.into_kstring() }.err()
    }

    /// The canonical template a marker refers to.
    fn reference_template(&self, local: NodeId) -> Result<Option<NodeId>> {
        let path = match self.dom.attribute(local, &self.config.ref_attribute) {
            Some(p) if ! p.is_empty() => p,
            _ => return Ok(None)
        };
        let branch = match self.branches.index_of(path).first() {
            Some(b) => self.branches.canonical(*b)?,
            None => return FractalErrorKind::TemplateNotFound { path: path.into_kstring() }.err()
        };
        Ok(self.branches.get(branch)?.template())
    }

    /// A fresh clone of `template`'s content. Top-level elements with
    /// children get the clone attribute.
    pub fn create_fragment(&mut self, template: NodeId) -> Result<NodeId> {
        let source = self.dom.content_root(template);
        let fragment = self.dom.create_fragment();
        for child in self.dom.children(source).to_vec() {
            let clone = self.dom.clone_node(child, true)?;
            if self.dom.is_element(clone) && ! self.dom.children(clone).is_empty() {
                self.dom.set_attribute(clone, self.config.clone_attribute.as_str(), "true")?;
            }
            self.dom.append_child(fragment, clone)?;
        }
        Ok(fragment)
    }

    fn init_template(&mut self, view: ViewId) -> Result<()> {
        let inst = self.instance(view)?;
        let (local, canonical, old_fragment) = match &inst.template {
            Some(t) => (t.local, t.canonical, t.fragment),
            None => {
                let parent = inst.parent.ok_or_else(
                    || FractalErrorKind::RootView { action: "initialized" }.error())?;
                let name = self.branches.get(inst.branch)?.name().to_string();
                let local = self.local_template(parent, &name)?;
                (local, self.reference_template(local)?, None)
            }
        };
        if let Some(old) = old_fragment {
            if self.dom.contains(old) && self.dom.parent(old).is_none() {
                self.dom.release(old)?;
            }
        }
        let fragment = self.create_fragment(canonical.unwrap_or(local))?;
        let nodes = self.dom.children(fragment).to_vec();
        self.instance_mut(view)?.template = Some(TemplateRef {
            local,
            canonical,
            fragment: Some(fragment),
            fragment_nodes: Some(nodes),
        });
        self.call_point(view, LifecyclePoint::InitTemplate, &mut HookArgs::None)
    }

    // ------------------------------------------------------------------
    // Children

    fn create_view(
        &mut self,
        parent: ViewId,
        class: ClassId,
        branch: BranchId,
        state: StatePatch
    ) -> Result<ViewId> {
        let view = self.views.insert(ViewInstance::new(class, branch, parent));
        trace!("{view:?}: new {:?} in {parent:?}", self.class(class)?.name());
        if let Err(e) = self.init_view(view, state) {
            if let Err(e2) = self.discard_view(view) {
                warn!("{view:?}: cleanup after failed initialization: {e2:#}");
            }
            return Err(e)
        }
        Ok(view)
    }

    fn init_view(&mut self, view: ViewId, state: StatePatch) -> Result<()> {
        self.update_state_with(view, state, UpdateOptions { reset: true })?;
        self.init_template(view)?;
        self.instance_mut(view)?.phase = Phase::Initialized;
        self.call_point(view, LifecyclePoint::Initialize, &mut HookArgs::None)
    }

    /// Drop a view that failed to initialize, before it got linked
    /// into its parent.
    fn discard_view(&mut self, view: ViewId) -> Result<()> {
        let children = match self.views.get(view) {
            Some(inst) => inst.children.clone(),
            None => return Ok(())
        };
        for child in children {
            self.destroy(child)?;
        }
        if let Some(inst) = self.views.remove(view) {
            if let Some(fragment) = inst.template.and_then(|t| t.fragment) {
                if self.dom.contains(fragment) {
                    self.dom.release(fragment)?;
                }
            }
        }
        Ok(())
    }

    /// The class for `view_spec` below `parent`, and the branch to attach
    /// it through, without defining anything.
    fn find_child_class(&self, parent: ViewId, view_spec: &str) -> Result<Option<(ClassId, BranchId)>> {
        let parent_branch = self.instance(parent)?.branch;
        if view_spec.contains('#') {
            let (path, name) = split_view_path(view_spec)?;
            let base = self.branches.get(parent_branch)?.path().to_string();
            let branch = self.branches.get_branch(&join_path(&base, path))?;
            return Ok(self.branches.view_class(branch, name)?.map(|c| (c, branch)))
        }
        let mut found = Vec::new();
        for b in self.branches.child_branches(parent_branch)? {
            if let Some(c) = self.branches.view_class(b, view_spec)? {
                found.push((c, b));
            }
        }
        let first = match found.first() {
            Some(f) => *f,
            None => return Ok(None)
        };
        if found.iter().all(|(c, _)| *c == first.0) {
            // the same class seen through aliases of its template
            let own = self.class(first.0)?.branch();
            return Ok(Some(found.into_iter()
                           .find(|(_, b)| Some(*b) == own)
                           .unwrap_or(first)))
        }
        let mut paths = Vec::new();
        for (_, b) in &found {
            paths.push(self.branches.get(*b)?.path().into_kstring());
        }
        FractalErrorKind::AmbiguousView { name: view_spec.into_kstring(), paths }.err()
    }

    /// Like `find_child_class`, defining a plain view for the child
    /// template of that name if none is registered.
    fn resolve_child_class(&mut self, parent: ViewId, view_spec: &str) -> Result<(ClassId, BranchId)> {
        if let Some(found) = self.find_child_class(parent, view_spec)? {
            return Ok(found)
        }
        let parent_branch = self.instance(parent)?.branch;
        let base = self.branches.get(parent_branch)?.path().to_string();
        let (path, name) = if view_spec.contains('#') {
            let (path, name) = split_view_path(view_spec)?;
            (join_path(&base, path), name)
        } else {
            (join_path(&base, view_spec), view_spec)
        };
        let branch = self.branches.get_branch(&path)?;
        let class = self.define(ViewDef::new(path).name(name))?;
        Ok((class, branch))
    }

    /// Create a child of `parent` and render it before the local
    /// template marker. `view_spec` is a view name registered on one of the
    /// parent template's child templates, or
    /// `"relative.template.path#viewName"`.
    pub fn add(&mut self, parent: ViewId, view_spec: &str, state: StatePatch) -> Result<ViewId> {
        self.add_at(parent, view_spec, state, Placement::Before)
    }

    pub fn append(&mut self, parent: ViewId, view_spec: &str, state: StatePatch) -> Result<ViewId> {
        self.add_at(parent, view_spec, state, Placement::Append)
    }

    pub fn prepend(&mut self, parent: ViewId, view_spec: &str, state: StatePatch) -> Result<ViewId> {
        self.add_at(parent, view_spec, state, Placement::Prepend)
    }

    pub fn before(&mut self, parent: ViewId, view_spec: &str, state: StatePatch) -> Result<ViewId> {
        self.add_at(parent, view_spec, state, Placement::Before)
    }

    pub fn after(&mut self, parent: ViewId, view_spec: &str, state: StatePatch) -> Result<ViewId> {
        self.add_at(parent, view_spec, state, Placement::After)
    }

    pub fn add_at(
        &mut self,
        parent: ViewId,
        view_spec: &str,
        state: StatePatch,
        placement: Placement
    ) -> Result<ViewId> {
        let (class, branch) = self.resolve_child_class(parent, view_spec)?;
        let child = self.create_view(parent, class, branch, state)?;
        let local = self.instance(child)?.template.as_ref()
            .map(|t| t.local)
            .ok_or_else(|| anyhow!("{child:?} has no template"))?;
        let before = match placement {
            Placement::Append => None,
            Placement::Prepend => self.dom.parent(local).and_then(|p| self.dom.first_child(p)),
            Placement::After => self.dom.next_sibling(local),
            Placement::Before => Some(local),
        };
        self.instance_mut(parent)?.children.push(child);
        self.render_at(child, before)?;
        Ok(child)
    }

    /// Update the most recently added child for `view_spec` and destroy
    /// the other ones; add a new child if there is none.
    pub fn replace(&mut self, parent: ViewId, view_spec: &str, state: StatePatch) -> Result<ViewId> {
        if let Some((class, _)) = self.find_child_class(parent, view_spec)? {
            let matching: Vec<ViewId> = self.instance(parent)?.children.iter()
                .copied()
                .filter(|c| self.views.get(*c).map_or(false, |v| v.class == class))
                .collect();
            if let Some((last, others)) = matching.split_last() {
                self.update_state(*last, state)?;
                for v in others {
                    self.destroy(*v)?;
                }
                return Ok(*last)
            }
        }
        self.add(parent, view_spec, state)
    }

    // ------------------------------------------------------------------
    // Rendering

    /// Re-render in place: empty the view, clone the template anew and
    /// insert it where the old nodes were.
    pub fn out(&mut self, view: ViewId) -> Result<()> {
        let before = self.empty(view)?;
        self.init_template(view)?;
        self.render_at(view, before)
    }

    /// Render the current fragment and insert it before `before`, or
    /// at the end of the local marker's parent if `None`.
    pub fn out_before(&mut self, view: ViewId, before: Option<NodeId>) -> Result<()> {
        self.render_at(view, before)
    }

    fn render_at(&mut self, view: ViewId, before: Option<NodeId>) -> Result<()> {
        if self.instance(view)?.parent.is_none() {
            return FractalErrorKind::RootView { action: "rendered" }.err();
        }
        self.call_point(view, LifecyclePoint::Render, &mut HookArgs::None)?;
        if ! self.is_alive(view) {
            return Ok(())
        }

        let (local, fragment) = match &self.instance(view)?.template {
            Some(TemplateRef { local, fragment: Some(fragment), .. }) => (*local, *fragment),
            _ => return Err(anyhow!("{view:?} has no fragment to render"))
        };
        let parent_node = before.or(Some(local))
            .and_then(|n| self.dom.parent(n))
            .ok_or_else(|| anyhow!("{view:?}: insertion point is not attached"))?;
        self.dom.insert_before(parent_node, fragment, before)?;

        let inst = self.instance_mut(view)?;
        inst.rendered = true;
        inst.phase = Phase::Rendered;
        trace!("{view:?}: rendered");
        self.call_point(view, LifecyclePoint::AfterRender, &mut HookArgs::None)?;
        if ! self.is_alive(view) {
            return Ok(())
        }
        self.propagate_mount(view)
    }

    /// Mark `view` and its rendered descendants mounted, if the parent
    /// is; `AfterMount` runs bottom-up.
    fn propagate_mount(&mut self, view: ViewId) -> Result<()> {
        let inst = self.instance(view)?;
        let parent_mounted = match inst.parent {
            Some(p) => self.instance(p)?.mounted,
            None => true
        };
        if ! parent_mounted || ! inst.rendered {
            return Ok(())
        }
        let inst = self.instance_mut(view)?;
        inst.mounted = true;
        inst.phase = Phase::Mounted;
        for child in inst.children.clone() {
            if self.is_alive(child) {
                self.propagate_mount(child)?;
            }
        }
        trace!("{view:?}: mounted");
        self.call_point(view, LifecyclePoint::AfterMount, &mut HookArgs::None)
    }

    // ------------------------------------------------------------------
    // Teardown

    /// Destroy all children, run `Clear` and take the view's nodes out
    /// of the document. Returns the node that followed the last one.
    pub fn empty(&mut self, view: ViewId) -> Result<Option<NodeId>> {
        if self.instance(view)?.parent.is_none() {
            return FractalErrorKind::RootView { action: "emptied" }.err();
        }
        // destroying a child unlinks it, so always take the first
        while let Some(first) = self.instance(view)?.children.first().copied() {
            self.destroy(first)?;
            if let Some(inst) = self.views.get_mut(view) {
                // a child whose removal failed to unlink it would
                // otherwise come up again
                inst.children.retain(|c| *c != first);
            }
        }
        self.call_point(view, LifecyclePoint::Clear, &mut HookArgs::None)?;

        let inst = self.instance_mut(view)?;
        let nodes = inst.template.as_mut().and_then(|t| t.fragment_nodes.take());
        let was_active = inst.phase != Phase::New;
        inst.rendered = false;
        inst.mounted = false;
        if was_active {
            inst.phase = Phase::Emptied;
        }
        let mut next = None;
        for node in nodes.unwrap_or_default() {
            if ! self.dom.contains(node) {
                continue
            }
            next = self.dom.next_sibling(node);
            self.dom.detach(node)?;
            self.dom.release(node)?;
        }
        trace!("{view:?}: emptied");
        Ok(next)
    }

    /// Empty the view, run `Remove` and unlink it from its parent. The
    /// id is dead afterwards; destroying it again does nothing.
    pub fn destroy(&mut self, view: ViewId) -> Result<()> {
        let inst = match self.views.get(view) {
            Some(inst) => inst,
            None => return Ok(())
        };
        if inst.parent.is_none() {
            return FractalErrorKind::RootView { action: "destroyed" }.err();
        }
        self.empty(view)?;
        self.call_point(view, LifecyclePoint::Remove, &mut HookArgs::None)?;
        let inst = match self.views.remove(view) {
            Some(inst) => inst,
            None => return Ok(())
        };
        if let Some(parent) = inst.parent.and_then(|p| self.views.get_mut(p)) {
            parent.children.retain(|c| *c != view);
        }
        if let Some(fragment) = inst.template.and_then(|t| t.fragment) {
            if self.dom.contains(fragment) && self.dom.parent(fragment).is_none() {
                self.dom.release(fragment)?;
            }
        }
        trace!("{view:?}: destroyed");
        Ok(())
    }
}
