//! Lifecycle points, hooks and mixins: bundles of hooks and methods
//! that view classes compose without subclassing.

use std::{collections::BTreeMap, rc::Rc};

use anyhow::Result;
use fdom::IntoKString;
use kstring::KString;
use serde_json::Value;

use crate::{fractal::Fractal,
            registry::ViewId,
            state::{State, StatePatch, UpdateOptions}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecyclePoint {
    Initialize,
    InitTemplate,
    Render,
    AfterRender,
    AfterMount,
    Clear,
    Remove,
    BeforeStateChange,
    AfterStateChange,
}

/// What a lifecycle point passes on besides the view.
pub enum HookArgs<'a> {
    None,
    /// The incoming patch may be changed by the callee.
    BeforeStateChange { patch: &'a mut StatePatch, options: UpdateOptions },
    /// The top-level keys that changed, with their new values.
    AfterStateChange { diff: &'a State, options: UpdateOptions },
}

/// A hook or overridable callback.
pub type Handler = Rc<dyn Fn(&mut Fractal, ViewId, &mut HookArgs<'_>) -> Result<()>>;

/// A named method spliced onto a view class.
pub type Method = Rc<dyn Fn(&mut Fractal, ViewId, &[Value]) -> Result<Value>>;

/// Ordered hook lists per lifecycle point. Inherited lists are copied
/// at class definition, own additions go to the end.
#[derive(Clone, Default)]
pub struct Hooks(BTreeMap<LifecyclePoint, Vec<Handler>>);

impl Hooks {
    pub fn add(&mut self, point: LifecyclePoint, h: Handler) {
        self.0.entry(point).or_default().push(h);
    }

    /// A copy of the list, so that running it can't be disturbed by
    /// the hooks themselves.
    pub fn get(&self, point: LifecyclePoint) -> Vec<Handler> {
        self.0.get(&point).cloned().unwrap_or_default()
    }

    pub fn count(&self, point: LifecyclePoint) -> usize {
        self.0.get(&point).map_or(0, |v| v.len())
    }
}

pub fn hook_handler(
    f: impl Fn(&mut Fractal, ViewId, &mut HookArgs<'_>) -> Result<()> + 'static
) -> Handler {
    Rc::new(f)
}

/// Wrap a callback that only needs the view.
pub fn handler(f: impl Fn(&mut Fractal, ViewId) -> Result<()> + 'static) -> Handler {
    Rc::new(move |fx: &mut Fractal, view: ViewId, _args: &mut HookArgs<'_>| f(fx, view))
}

pub fn before_state_change_handler(
    f: impl Fn(&mut Fractal, ViewId, &mut StatePatch) -> Result<()> + 'static
) -> Handler {
    Rc::new(move |fx: &mut Fractal, view: ViewId, args: &mut HookArgs<'_>| match args {
        HookArgs::BeforeStateChange { patch, .. } => f(fx, view, patch),
        _ => Ok(())
    })
}

pub fn after_state_change_handler(
    f: impl Fn(&mut Fractal, ViewId, &State) -> Result<()> + 'static
) -> Handler {
    Rc::new(move |fx: &mut Fractal, view: ViewId, args: &mut HookArgs<'_>| match args {
        HookArgs::AfterStateChange { diff, .. } => f(fx, view, diff),
        _ => Ok(())
    })
}

#[derive(Clone, Default)]
pub struct MixinDef {
    pub(crate) require: Vec<KString>,
    pub(crate) hooks: Vec<(LifecyclePoint, Handler)>,
    pub(crate) methods: BTreeMap<KString, Method>,
}

impl MixinDef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another mixin to apply first.
    pub fn require(mut self, name: impl IntoKString) -> Self {
        self.require.push(name.into_kstring());
        self
    }

    pub fn hook(
        mut self,
        point: LifecyclePoint,
        f: impl Fn(&mut Fractal, ViewId, &mut HookArgs<'_>) -> Result<()> + 'static
    ) -> Self {
        self.hooks.push((point, Rc::new(f)));
        self
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
