//! Per-view event listeners, and triggering along the view tree.
//! Listeners of the `"all"` event receive every event, with the event
//! name prepended to the arguments.

use std::{collections::BTreeMap, rc::Rc};

use anyhow::{bail, Result};
use fdom::IntoKString;
use kstring::KString;
use serde_json::Value;

use crate::{fractal::Fractal,
            mixin::{LifecyclePoint, MixinDef},
            registry::ViewId,
            trace};

pub const NAME: &str = "events";

pub const ALL_EVENTS: &str = "all";

/// Called with the view the event fired on.
pub type Listener = Rc<dyn Fn(&mut Fractal, ViewId, &[Value]) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    once: bool,
    f: Listener,
}

#[derive(Default)]
struct Listeners {
    last_id: u64,
    events: BTreeMap<KString, Vec<Entry>>,
}

impl Listeners {
    /// The listeners for `event`, dropping the one-shot ones.
    fn take(&mut self, event: &str) -> Vec<Listener> {
        match self.events.get_mut(event) {
            Some(entries) => {
                let fs = entries.iter().map(|e| e.f.clone()).collect();
                entries.retain(|e| ! e.once);
                fs
            }
            None => Vec::new()
        }
    }
}

pub(crate) fn mixin() -> MixinDef {
    MixinDef::new()
        .hook(LifecyclePoint::Remove, |fx, view, _| fx.off(view, None))
        .method("trigger", |fx, view, args| {
            let event = match args.first() {
                Some(Value::String(s)) => s.clone(),
                _ => bail!("trigger: expecting the event name as first argument")
            };
            fx.trigger(view, &event, &args[1..])?;
            Ok(Value::Null)
        })
}

impl Fractal {
    fn listen(
        &mut self,
        view: ViewId,
        event: &str,
        once: bool,
        f: Listener
    ) -> Result<ListenerId> {
        self.require_mixin(view, NAME)?;
        let l = self.extension_mut::<Listeners>(view)?;
        l.last_id += 1;
        let id = ListenerId(l.last_id);
        l.events.entry(event.into_kstring()).or_default().push(Entry { id, once, f });
        Ok(id)
    }

    pub fn on(
        &mut self,
        view: ViewId,
        event: &str,
        f: impl Fn(&mut Fractal, ViewId, &[Value]) -> Result<()> + 'static
    ) -> Result<ListenerId> {
        self.listen(view, event, false, Rc::new(f))
    }

    /// Like `on`, removed after the first call.
    pub fn once(
        &mut self,
        view: ViewId,
        event: &str,
        f: impl Fn(&mut Fractal, ViewId, &[Value]) -> Result<()> + 'static
    ) -> Result<ListenerId> {
        self.listen(view, event, true, Rc::new(f))
    }

    /// Remove the listeners of `event`, or all of them.
    pub fn off(&mut self, view: ViewId, event: Option<&str>) -> Result<()> {
        self.require_mixin(view, NAME)?;
        match event {
            Some(event) => {
                self.extension_mut::<Listeners>(view)?.events.remove(event);
            }
            None => {
                self.remove_extension::<Listeners>(view);
            }
        }
        Ok(())
    }

    /// Remove a single listener; false if it wasn't registered.
    pub fn off_listener(&mut self, view: ViewId, id: ListenerId) -> Result<bool> {
        self.require_mixin(view, NAME)?;
        let l = self.extension_mut::<Listeners>(view)?;
        let mut found = false;
        for entries in l.events.values_mut() {
            let n = entries.len();
            entries.retain(|e| e.id != id);
            found |= entries.len() != n;
        }
        Ok(found)
    }

    /// Call the listeners of `event` on `view`, then those of "all".
    /// Stops when a listener destroys the view.
    pub fn trigger(&mut self, view: ViewId, event: &str, args: &[Value]) -> Result<()> {
        self.require_mixin(view, NAME)?;
        let (direct, all) = {
            let l = self.extension_mut::<Listeners>(view)?;
            let direct = l.take(event);
            let all = if event == ALL_EVENTS { Vec::new() } else { l.take(ALL_EVENTS) };
            (direct, all)
        };
        trace!("{view:?}: trigger {event:?} ({} listeners)", direct.len() + all.len());
        for f in direct {
            if ! self.is_alive(view) {
                return Ok(())
            }
            f(self, view, args)?;
        }
        if ! all.is_empty() {
            let mut all_args = Vec::with_capacity(args.len() + 1);
            all_args.push(Value::String(event.into()));
            all_args.extend_from_slice(args);
            for f in all {
                if ! self.is_alive(view) {
                    return Ok(())
                }
                f(self, view, &all_args)?;
            }
        }
        Ok(())
    }

    /// Trigger `event` on each ancestor that has the events mixin,
    /// nearest first, not on `view` itself.
    pub fn trigger_up(&mut self, view: ViewId, event: &str, args: &[Value]) -> Result<()> {
        self.require_mixin(view, NAME)?;
        let mut cur = self.parent(view)?;
        while let Some(p) = cur {
            if self.class_of(p)?.has_mixin(NAME) {
                self.trigger(p, event, args)?;
            }
            cur = match self.views.get(p) {
                Some(inst) => inst.parent(),
                None => return Ok(())
            };
        }
        Ok(())
    }

    /// Trigger `event` on all descendants that have the events mixin,
    /// depth first in child order, not on `view` itself. Views
    /// destroyed on the way are skipped.
    pub fn trigger_down(&mut self, view: ViewId, event: &str, args: &[Value]) -> Result<()> {
        self.require_mixin(view, NAME)?;
        self.trigger_children(view, event, args)
    }

    fn trigger_children(&mut self, view: ViewId, event: &str, args: &[Value]) -> Result<()> {
        let children = match self.views.get(view) {
            Some(inst) => inst.children().to_vec(),
            None => return Ok(())
        };
        for child in children {
            if ! self.is_alive(child) {
                continue
            }
            if self.class_of(child)?.has_mixin(NAME) {
                self.trigger(child, event, args)?;
            }
            self.trigger_children(child, event, args)?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use serde_json::json;
    use crate::{config::FractalConfig, error::{error_kind, FractalErrorKind},
                registry::ViewDef, state::StatePatch};

    type Log = Rc<RefCell<Vec<String>>>;

    fn record(log: &Log) -> impl Fn(&mut Fractal, ViewId, &[Value]) -> Result<()> {
        let log = log.clone();
        move |fx: &mut Fractal, view: ViewId, args: &[Value]| {
            let label = fx.state_value(view, "label")?.as_str().unwrap_or("").to_string();
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            log.borrow_mut().push(format!("{label}:{}", args.join(",")));
            Ok(())
        }
    }

    const PAGE: &str = "<body><template data-name=\"a\"><div>\
        <template data-name=\"b\"><p>\
          <template data-name=\"c\"><i></i></template>\
        </p></template></div></template></body>";

    /// a > [b1 > [c1, c2], b2]
    fn tree(fx: &mut Fractal) -> Result<Vec<ViewId>> {
        let body = fx.load_markup(PAGE)?;
        fx.scan(body)?;
        fx.define(ViewDef::new("a").mixin(NAME))?;
        fx.define(ViewDef::new("a.b"))?;
        fx.define(ViewDef::new("a.b.c").mixin(NAME))?;
        let root = fx.root()?;
        let a = fx.append(root, "a", StatePatch::new().set("label", "a"))?;
        let b1 = fx.append(a, "b", StatePatch::new().set("label", "b1"))?;
        let c1 = fx.append(b1, "c", StatePatch::new().set("label", "c1"))?;
        let c2 = fx.append(b1, "c", StatePatch::new().set("label", "c2"))?;
        let b2 = fx.append(a, "b", StatePatch::new().set("label", "b2"))?;
        Ok(vec![a, b1, c1, c2, b2])
    }

    #[test]
    fn t_on_once_off() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        let v = tree(&mut fx)?;
        let log: Log = Default::default();
        fx.on(v[0], "x", record(&log))?;
        fx.once(v[0], "x", record(&log))?;
        let id = fx.on(v[0], ALL_EVENTS, record(&log))?;
        fx.trigger(v[0], "x", &[json!(1)])?;
        fx.trigger(v[0], "x", &[json!(2)])?;
        assert_eq!(*log.borrow(),
                   vec!["a:1", "a:1", "a:\"x\",1", "a:2", "a:\"x\",2"]);
        assert!(fx.off_listener(v[0], id)?);
        assert!(! fx.off_listener(v[0], id)?);
        fx.off(v[0], Some("x"))?;
        fx.call(v[0], "trigger", &[json!("x"), json!(3)])?;
        assert_eq!(log.borrow().len(), 5);

        // b doesn't have the mixin
        let e = fx.on(v[1], "x", record(&log)).err().unwrap();
        assert!(matches!(error_kind(&e), Some(FractalErrorKind::MixinMissing { .. })));
        Ok(())
    }

    #[test]
    fn t_trigger_up_down() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        let v = tree(&mut fx)?;
        let log: Log = Default::default();
        for view in [v[0], v[2], v[3]] {
            fx.on(view, "e", record(&log))?;
        }
        fx.trigger_down(v[0], "e", &[])?;
        assert_eq!(*log.borrow(), vec!["c1:", "c2:"]);
        log.borrow_mut().clear();
        fx.trigger_up(v[3], "e", &[json!("up")])?;
        assert_eq!(*log.borrow(), vec!["a:\"up\""]);
        Ok(())
    }

    #[test]
    fn t_trigger_down_skips_destroyed() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        let v = tree(&mut fx)?;
        let log: Log = Default::default();
        let c2 = v[3];
        fx.on(v[2], "e", move |fx: &mut Fractal, _view: ViewId, _args: &[Value]| fx.destroy(c2))?;
        fx.on(v[3], "e", record(&log))?;
        fx.trigger_down(v[0], "e", &[])?;
        assert!(log.borrow().is_empty());
        assert!(! fx.is_alive(c2));
        Ok(())
    }

    #[test]
    fn t_remove_drops_listeners() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        let v = tree(&mut fx)?;
        let log: Log = Default::default();
        fx.on(v[2], "e", record(&log))?;
        fx.destroy(v[2])?;
        fx.trigger_down(v[0], "e", &[])?;
        assert!(log.borrow().is_empty());
        Ok(())
    }
}
