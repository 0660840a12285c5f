//! The engine context: document, branch index, class registry,
//! mixins and view instances. Setup (`scan` and the `define`s) comes
//! first; views can only be created after the scan.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use fdom::{Arena, Dom, IntoKString, NodeId};
use kstring::KString;

use crate::{branch::BranchIndex,
            config::FractalConfig,
            error::FractalErrorKind,
            mixin::MixinDef,
            mixins,
            registry::{ClassId, ViewClass, ViewDef, ViewId},
            trace,
            variables::Modifiers,
            view::ViewInstance};

pub struct Fractal {
    pub(crate) config: FractalConfig,
    pub(crate) dom: Dom,
    pub(crate) branches: BranchIndex,
    pub(crate) classes: Arena<ViewClass>,
    pub(crate) base_view: ClassId,
    pub(crate) default_view: ClassId,
    /// Definitions made before the scan, with their reserved slots.
    pub(crate) pending: Vec<(ClassId, ViewDef)>,
    pub(crate) mixins: BTreeMap<KString, MixinDef>,
    pub(crate) views: Arena<ViewInstance>,
    /// Set by `scan`.
    pub(crate) root_view: Option<ViewId>,
    pub(crate) modifiers: Modifiers,
}

impl Fractal {
    /// A context with an empty document and the built-in mixins
    /// ("variables", "events", "invoke", "query") and modifiers.
    pub fn new(config: FractalConfig) -> Self {
        let dom = Dom::new(config.template_mode());
        let mut classes = Arena::new();
        let base_view = classes.insert(ViewClass::base());
        let mut fx = Fractal {
            config,
            dom,
            branches: BranchIndex::new(),
            classes,
            base_view,
            default_view: base_view,
            pending: Vec::new(),
            mixins: BTreeMap::new(),
            views: Arena::new(),
            root_view: None,
            modifiers: Modifiers::with_defaults(),
        };
        mixins::register_builtin(&mut fx);
        fx
    }

    pub fn config(&self) -> &FractalConfig {
        &self.config
    }

    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn dom_mut(&mut self) -> &mut Dom {
        &mut self.dom
    }

    pub fn branches(&self) -> &BranchIndex {
        &self.branches
    }

    pub fn modifiers(&self) -> &Modifiers {
        &self.modifiers
    }

    pub fn modifiers_mut(&mut self) -> &mut Modifiers {
        &mut self.modifiers
    }

    pub fn is_scanned(&self) -> bool {
        self.root_view.is_some()
    }

    /// The pseudo view standing for the scanned root element.
    pub fn root(&self) -> Result<ViewId> {
        self.root_view.ok_or_else(|| FractalErrorKind::NotScanned.error())
    }

    /// Parse `markup` into the document; returns its `<body>` element
    /// if there is one, the document node otherwise.
    pub fn load_markup(&mut self, markup: &str) -> Result<NodeId> {
        let doc = self.dom.document();
        self.dom.parse_into(doc, markup)?;
        Ok(self.dom.find_tag(doc, "body").unwrap_or(doc))
    }

    // ------------------------------------------------------------------
    // Mixins

    pub fn define_mixin(&mut self, name: impl IntoKString, def: MixinDef) -> Result<()> {
        let name = name.into_kstring();
        if self.mixins.contains_key(&name) {
            return FractalErrorKind::DuplicateMixin { name }.err();
        }
        trace!("define mixin {name:?}");
        self.mixins.insert(name, def);
        Ok(())
    }

    pub fn get_mixin(&self, name: &str) -> Option<&MixinDef> {
        self.mixins.get(name)
    }

    /// Apply mixin `name` and the mixins it requires to `class`, each
    /// at most once.
    pub(crate) fn apply_mixin(&self, class: &mut ViewClass, name: &str) -> Result<()> {
        if class.mixins.contains(name) {
            return Ok(())
        }
        let def = self.mixins.get(name).ok_or_else(
            || FractalErrorKind::UnknownMixin { name: name.into_kstring() }.error())?;
        class.mixins.insert(name.into_kstring());
        for req in &def.require {
            self.apply_mixin(class, req)?;
        }
        for (point, h) in &def.hooks {
            class.hooks.add(*point, h.clone());
        }
        for (k, m) in &def.methods {
            class.methods.insert(k.clone(), m.clone());
        }
        trace!("applied mixin {name:?} to {:?}", class.name);
        Ok(())
    }

    /// Check that `view`'s class has mixin `name`.
    pub(crate) fn require_mixin(&self, view: ViewId, name: &str) -> Result<()> {
        let class = self.class_of(view)?;
        if class.has_mixin(name) {
            Ok(())
        } else {
            FractalErrorKind::MixinMissing {
                class: class.name.clone(),
                name: name.into_kstring()
            }.err()
        }
    }

    pub(crate) fn class_of(&self, view: ViewId) -> Result<&ViewClass> {
        let class = self.instance(view)?.class;
        self.classes.get(class).ok_or_else(|| anyhow!("invalid view class id {class:?}"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::error_kind, mixin::LifecyclePoint};

    #[test]
    fn t_mixin_registry() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        assert!(fx.get_mixin("events").is_some());
        let e = fx.define_mixin("events", MixinDef::new()).err().unwrap();
        assert_eq!(e.to_string(), "mixin \"events\" is already defined");
        assert!(matches!(error_kind(&e), Some(FractalErrorKind::DuplicateMixin { .. })));
        fx.define_mixin("a", MixinDef::new().require("b")
                        .hook(LifecyclePoint::Render, |_, _, _| Ok(())))?;
        fx.define_mixin("b", MixinDef::new().require("a")
                        .hook(LifecyclePoint::Render, |_, _, _| Ok(())))?;

        // requires apply first, cycles and repetitions are harmless
        let mut class = ViewClass::base();
        fx.apply_mixin(&mut class, "a")?;
        fx.apply_mixin(&mut class, "b")?;
        fx.apply_mixin(&mut class, "a")?;
        assert!(class.has_mixin("a") && class.has_mixin("b"));
        assert_eq!(class.hook_count(LifecyclePoint::Render), 2);
        Ok(())
    }

    #[test]
    fn t_not_scanned() {
        let fx = Fractal::new(FractalConfig::default());
        let e = fx.root().err().unwrap();
        assert_eq!(e.to_string(), "templates have not been scanned yet");
    }
}
