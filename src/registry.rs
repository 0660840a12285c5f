//! View classes: named bundles of default state, hooks, callbacks
//! and methods, bound to a branch.

use std::{collections::{BTreeMap, BTreeSet}, rc::Rc};

use anyhow::{anyhow, Result};
use fdom::{Id, IntoKString};
use kstring::KString;
use serde_json::Value;

use crate::{branch::{join_path, BranchId},
            error::FractalErrorKind,
            fractal::Fractal,
            mixin::{after_state_change_handler, before_state_change_handler, handler,
                    Handler, HookArgs, Hooks, LifecyclePoint, Method},
            state::{DefaultState, State},
            trace,
            view::ViewInstance};

pub type ClassId = Id<ViewClass>;
pub type ViewId = Id<ViewInstance>;

pub struct ViewClass {
    pub(crate) name: KString,
    /// `None` for the base class and for definitions still waiting
    /// for the scan.
    pub(crate) branch: Option<BranchId>,
    pub(crate) parent: Option<ClassId>,
    pub(crate) default_state: Option<DefaultState>,
    pub(crate) mixins: BTreeSet<KString>,
    pub(crate) hooks: Hooks,
    /// Overridable callbacks, run after the hooks of the same point.
    pub(crate) callbacks: BTreeMap<LifecyclePoint, Handler>,
    pub(crate) methods: BTreeMap<KString, Method>,
}

impl ViewClass {
    /// The class every other one derives from unless told otherwise;
    /// re-renders on state changes.
    pub(crate) fn base() -> Self {
        let mut callbacks = BTreeMap::new();
        callbacks.insert(LifecyclePoint::AfterStateChange,
                         handler(|fx, view| fx.out(view)));
        ViewClass {
            name: KString::from_static("View"),
            branch: None,
            parent: None,
            default_state: None,
            mixins: BTreeSet::new(),
            hooks: Hooks::default(),
            callbacks,
            methods: BTreeMap::new(),
        }
    }

    fn placeholder(name: KString) -> Self {
        ViewClass {
            name,
            branch: None,
            parent: None,
            default_state: None,
            mixins: BTreeSet::new(),
            hooks: Hooks::default(),
            callbacks: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn branch(&self) -> Option<BranchId> { self.branch }
    pub fn parent(&self) -> Option<ClassId> { self.parent }
    pub fn default_state(&self) -> Option<&DefaultState> { self.default_state.as_ref() }

    pub fn has_mixin(&self, name: &str) -> bool {
        self.mixins.contains(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn hook_count(&self, point: LifecyclePoint) -> usize {
        self.hooks.count(point)
    }
}

/// Parent class of a definition.
#[derive(Debug, Clone)]
pub enum ParentView {
    Class(ClassId),
    /// `"template.path#viewName"`
    Path(KString),
}

/// A view class definition, passed to `Fractal::define`.
#[derive(Clone)]
pub struct ViewDef {
    pub(crate) path: KString,
    pub(crate) name: Option<KString>,
    pub(crate) parent: Option<ParentView>,
    pub(crate) relative_to: Option<ClassId>,
    pub(crate) default_state: Option<DefaultState>,
    pub(crate) mixins: Vec<KString>,
    pub(crate) hooks: Vec<(LifecyclePoint, Handler)>,
    pub(crate) callbacks: BTreeMap<LifecyclePoint, Handler>,
    pub(crate) methods: BTreeMap<KString, Method>,
}

impl ViewDef {
    /// A definition for the template at dotted `path`; the view is
    /// named after the last path segment unless `name` is given.
    pub fn new(path: impl IntoKString) -> Self {
        ViewDef {
            path: path.into_kstring(),
            name: None,
            parent: None,
            relative_to: None,
            default_state: None,
            mixins: Vec::new(),
            hooks: Vec::new(),
            callbacks: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn name(mut self, name: impl IntoKString) -> Self {
        self.name = Some(name.into_kstring());
        self
    }

    pub fn parent(mut self, parent: ClassId) -> Self {
        self.parent = Some(ParentView::Class(parent));
        self
    }

    pub fn parent_path(mut self, view_path: impl IntoKString) -> Self {
        self.parent = Some(ParentView::Path(view_path.into_kstring()));
        self
    }

    pub fn default_state(mut self, state: State) -> Self {
        self.default_state = Some(DefaultState::Map(state));
        self
    }

    /// Like `default_state` from a JSON object.
    pub fn default_state_json(self, v: Value) -> Result<Self> {
        match v {
            Value::Object(m) => Ok(self.default_state(m)),
            v => Err(anyhow!("default state must be a JSON object, got: {v}"))
        }
    }

    pub fn default_state_with(
        mut self,
        f: impl Fn(&Fractal, ViewId) -> Result<State> + 'static
    ) -> Self {
        self.default_state = Some(DefaultState::Computed(Rc::new(f)));
        self
    }

    pub fn mixin(mut self, name: impl IntoKString) -> Self {
        self.mixins.push(name.into_kstring());
        self
    }

    /// Append a hook for `point` after the inherited ones.
    pub fn hook(
        mut self,
        point: LifecyclePoint,
        f: impl Fn(&mut Fractal, ViewId, &mut HookArgs<'_>) -> Result<()> + 'static
    ) -> Self {
        self.hooks.push((point, Rc::new(f)));
        self
    }

    /// Override the callback for `point`.
    pub fn callback(mut self, point: LifecyclePoint, h: Handler) -> Self {
        self.callbacks.insert(point, h);
        self
    }

    pub fn on_initialize(self, f: impl Fn(&mut Fractal, ViewId) -> Result<()> + 'static) -> Self {
        self.callback(LifecyclePoint::Initialize, handler(f))
    }

    pub fn on_render(self, f: impl Fn(&mut Fractal, ViewId) -> Result<()> + 'static) -> Self {
        self.callback(LifecyclePoint::Render, handler(f))
    }

    pub fn on_after_render(self, f: impl Fn(&mut Fractal, ViewId) -> Result<()> + 'static) -> Self {
        self.callback(LifecyclePoint::AfterRender, handler(f))
    }

    pub fn on_after_mount(self, f: impl Fn(&mut Fractal, ViewId) -> Result<()> + 'static) -> Self {
        self.callback(LifecyclePoint::AfterMount, handler(f))
    }

    pub fn on_clear(self, f: impl Fn(&mut Fractal, ViewId) -> Result<()> + 'static) -> Self {
        self.callback(LifecyclePoint::Clear, handler(f))
    }

    pub fn on_remove(self, f: impl Fn(&mut Fractal, ViewId) -> Result<()> + 'static) -> Self {
        self.callback(LifecyclePoint::Remove, handler(f))
    }

    pub fn on_before_state_change(
        self,
        f: impl Fn(&mut Fractal, ViewId, &mut crate::state::StatePatch) -> Result<()> + 'static
    ) -> Self {
        self.callback(LifecyclePoint::BeforeStateChange, before_state_change_handler(f))
    }

    pub fn on_after_state_change(
        self,
        f: impl Fn(&mut Fractal, ViewId, &State) -> Result<()> + 'static
    ) -> Self {
        self.callback(LifecyclePoint::AfterStateChange, after_state_change_handler(f))
    }

    pub fn method(
        mut self,
        name: impl IntoKString,
        f: impl Fn(&mut Fractal, ViewId, &[Value]) -> Result<Value> + 'static
    ) -> Self {
        self.methods.insert(name.into_kstring(), Rc::new(f));
        self
    }
}

/// Split `"template.path#viewName"`.
pub fn split_view_path(view_path: &str) -> Result<(&str, &str)> {
    match view_path.split_once('#') {
        Some((path, name)) if ! name.is_empty() && ! name.contains('#') =>
            Ok((path, name)),
        _ => FractalErrorKind::IllegalViewPath { path: view_path.into_kstring() }.err()
    }
}

impl Fractal {
    pub fn class(&self, id: ClassId) -> Result<&ViewClass> {
        self.classes.get(id).ok_or_else(|| anyhow!("invalid view class id {id:?}"))
    }

    /// The class views derive from when no parent is given.
    pub fn default_view(&self) -> ClassId {
        self.default_view
    }

    pub fn set_default_view(&mut self, class: ClassId) -> Result<()> {
        self.class(class)?;
        self.default_view = class;
        Ok(())
    }

    /// The base class, which all classes derive from.
    pub fn base_view(&self) -> ClassId {
        self.base_view
    }

    /// Register a view class. Before `scan`, the definition is queued
    /// and resolved at the end of the scan, in call order.
    pub fn define(&mut self, def: ViewDef) -> Result<ClassId> {
        if self.is_scanned() {
            self.define_in(def, None)
        } else {
            let name = def.name.clone().unwrap_or_else(|| last_segment(&def.path));
            trace!("define {}#{name}: queued until scan", def.path);
            let slot = self.classes.insert(ViewClass::placeholder(name));
            self.pending.push((slot, def));
            Ok(slot)
        }
    }

    /// Like `define`, with `def`'s path relative to the template of
    /// `class`.
    pub fn define_relative(&mut self, class: ClassId, mut def: ViewDef) -> Result<ClassId> {
        self.class(class)?;
        def.relative_to = Some(class);
        self.define(def)
    }

    pub(crate) fn resolve_pending(&mut self) -> Result<()> {
        for (slot, def) in std::mem::take(&mut self.pending) {
            self.define_in(def, Some(slot))?;
        }
        Ok(())
    }

    fn define_in(&mut self, def: ViewDef, slot: Option<ClassId>) -> Result<ClassId> {
        let ViewDef {
            path, name, parent, relative_to, default_state, mixins, hooks, callbacks, methods
        } = def;
        let path = match relative_to {
            Some(class) => {
                let base = match self.class(class)?.branch {
                    Some(b) => self.branches.get(b)?.path().to_string(),
                    None => String::new()
                };
                join_path(&base, &path)
            }
            None => path
        };
        let name = name.unwrap_or_else(|| last_segment(&path));
        let branch = self.branches.get_branch(&path)?;
        let parent = match parent {
            None => self.default_view,
            Some(ParentView::Class(id)) => {
                self.class(id)?;
                id
            }
            Some(ParentView::Path(p)) => self.get_view_path(&p)?,
        };

        let parent_class = self.class(parent)?;
        let mut class = ViewClass {
            name: name.clone(),
            branch: Some(branch),
            parent: Some(parent),
            default_state: DefaultState::merge(parent_class.default_state.as_ref(),
                                               default_state),
            mixins: parent_class.mixins.clone(),
            hooks: parent_class.hooks.clone(),
            callbacks: parent_class.callbacks.clone(),
            methods: parent_class.methods.clone(),
        };
        for m in &mixins {
            self.apply_mixin(&mut class, m)?;
        }
        for (point, h) in hooks {
            class.hooks.add(point, h);
        }
        class.callbacks.extend(callbacks);
        class.methods.extend(methods);

        // check before taking the slot
        let branch_path = self.branches.get(branch)?.path().to_string();
        for b in self.branches.index_of(&branch_path) {
            if self.branches.get(*b)?.view_classes().contains_key(name.as_str()) {
                return FractalErrorKind::DuplicateView {
                    path: branch_path.into_kstring(),
                    name,
                }.err();
            }
        }
        let id = match slot {
            Some(slot) => {
                let c = self.classes.get_mut(slot)
                    .ok_or_else(|| anyhow!("invalid view class id {slot:?}"))?;
                *c = class;
                slot
            }
            None => self.classes.insert(class)
        };
        self.branches.register_view(branch, &name, id)?;
        trace!("define {branch_path}#{name}");
        Ok(id)
    }

    /// Add a hook to an existing class. Classes derived from it
    /// earlier don't see it.
    pub fn add_hook(
        &mut self,
        class: ClassId,
        point: LifecyclePoint,
        f: impl Fn(&mut Fractal, ViewId, &mut HookArgs<'_>) -> Result<()> + 'static
    ) -> Result<()> {
        let c = self.classes.get_mut(class)
            .ok_or_else(|| anyhow!("invalid view class id {class:?}"))?;
        c.hooks.add(point, Rc::new(f));
        Ok(())
    }

    /// A view class by template path and name, looking at the branch
    /// and then its reference target.
    pub fn get_view(&self, path: &str, name: &str) -> Result<ClassId> {
        let branch = self.branches.get_branch(path)?;
        self.branches.view_class(branch, name)?.ok_or_else(
            || FractalErrorKind::ViewNotFound {
                path: path.into_kstring(),
                name: name.into_kstring()
            }.error())
    }

    /// `get_view` for `"template.path#viewName"`.
    pub fn get_view_path(&self, view_path: &str) -> Result<ClassId> {
        let (path, name) = split_view_path(view_path)?;
        self.get_view(path, name)
    }
}

fn last_segment(path: &str) -> KString {
    path.rsplit('.').next().unwrap_or(path).into_kstring()
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::{config::FractalConfig, error::error_kind, state::DefaultState};

    fn scanned(markup: &str) -> Result<Fractal> {
        let mut fx = Fractal::new(FractalConfig::default());
        let body = fx.load_markup(markup)?;
        fx.scan(body)?;
        Ok(fx)
    }

    const LIST: &str = "<body><template data-name=\"list\">\
                        <ul><template data-name=\"item\"><li>x</li></template></ul>\
                        </template><template data-name=\"alias\" data-ref=\"list\"></template></body>";

    #[test]
    fn t_split_view_path() -> Result<()> {
        assert_eq!(split_view_path("a.b#c")?, ("a.b", "c"));
        assert_eq!(split_view_path("#c")?, ("", "c"));
        for bad in ["a.b", "a#", "a#b#c"] {
            let e = split_view_path(bad).err().unwrap();
            assert!(matches!(error_kind(&e), Some(FractalErrorKind::IllegalViewPath { .. })));
        }
        Ok(())
    }

    #[test]
    fn t_define_and_default_state() -> Result<()> {
        let mut fx = scanned(LIST)?;
        let list = fx.define(ViewDef::new("list").name("default")
                             .default_state_json(json!({"count": 0, "title": "t"}))?)?;
        assert_eq!(fx.class(list)?.name(), "default");
        assert_eq!(fx.get_view("list", "default")?, list);
        assert_eq!(fx.get_view_path("list#default")?, list);

        // no own defaults: the parent's, by value
        let sub = fx.define(ViewDef::new("list").name("sub").parent(list))?;
        match (fx.class(sub)?.default_state(), fx.class(list)?.default_state()) {
            (Some(DefaultState::Map(a)), Some(DefaultState::Map(b))) => assert_eq!(a, b),
            _ => panic!("expecting maps")
        }
        // shallow merge over the parent's
        let sub2 = fx.define(ViewDef::new("list").name("sub2").parent_path("list#sub")
                             .default_state_json(json!({"count": 1}))?)?;
        match fx.class(sub2)?.default_state() {
            Some(DefaultState::Map(m)) =>
                assert_eq!(Value::Object(m.clone()), json!({"count": 1, "title": "t"})),
            _ => panic!("expecting a map")
        }
        assert_eq!(fx.class(sub2)?.parent(), Some(sub));

        // the name defaults to the last path segment
        let item = fx.define(ViewDef::new("list.item"))?;
        assert_eq!(fx.class(item)?.name(), "item");
        Ok(())
    }

    #[test]
    fn t_define_errors() -> Result<()> {
        let mut fx = scanned(LIST)?;
        fx.define(ViewDef::new("list").name("x"))?;
        let e = fx.define(ViewDef::new("list").name("x")).err().unwrap();
        assert_eq!(e.to_string(), "view \"x\" is already defined for template \"list\"");
        // visible through the alias as well
        let e = fx.define(ViewDef::new("alias").name("x")).err().unwrap();
        assert!(matches!(error_kind(&e), Some(FractalErrorKind::DuplicateView { .. })));
        let e = fx.define(ViewDef::new("nope")).err().unwrap();
        assert_eq!(e.to_string(), "template \"nope\" not found");
        let e = fx.define(ViewDef::new("list").name("y").parent_path("list#nope")).err().unwrap();
        assert!(matches!(error_kind(&e), Some(FractalErrorKind::ViewNotFound { .. })));
        let e = fx.define(ViewDef::new("list").name("y").mixin("nope")).err().unwrap();
        assert_eq!(e.to_string(), "unknown mixin \"nope\"");
        Ok(())
    }

    #[test]
    fn t_reference_views() -> Result<()> {
        let mut fx = scanned(LIST)?;
        let x = fx.define(ViewDef::new("list").name("x"))?;
        assert_eq!(fx.get_view("alias", "x")?, x);
        assert_eq!(fx.get_view("list", "x")?, fx.get_view("alias", "x")?);
        assert_eq!(fx.get_view("alias.item", "item").ok(), None);
        let item = fx.define(ViewDef::new("alias.item"))?;
        assert_eq!(fx.get_view("list.item", "item")?, item);
        Ok(())
    }

    #[test]
    fn t_define_before_scan() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        let list = fx.define(ViewDef::new("list").name("default"))?;
        let item = fx.define_relative(list, ViewDef::new("item"))?;
        let body = fx.load_markup(LIST)?;
        fx.scan(body)?;
        assert_eq!(fx.get_view("list", "default")?, list);
        assert_eq!(fx.get_view("list.item", "item")?, item);
        assert_eq!(fx.class(item)?.branch(), Some(fx.branches().get_branch("list.item")?));

        let mut fx = Fractal::new(FractalConfig::default());
        fx.define(ViewDef::new("missing"))?;
        let body = fx.load_markup(LIST)?;
        let e = fx.scan(body).err().unwrap();
        assert_eq!(e.to_string(), "template \"missing\" not found");
        Ok(())
    }

    #[test]
    fn t_default_view() -> Result<()> {
        let mut fx = scanned(LIST)?;
        let base = fx.define(ViewDef::new("list").name("base")
                             .default_state_json(json!({"a": 1}))?)?;
        fx.set_default_view(base)?;
        let x = fx.define(ViewDef::new("list.item").name("x"))?;
        assert_eq!(fx.class(x)?.parent(), Some(base));
        match fx.class(x)?.default_state() {
            Some(DefaultState::Map(m)) => assert_eq!(m.get("a"), Some(&json!(1))),
            _ => panic!("expecting a map")
        }
        Ok(())
    }
}
