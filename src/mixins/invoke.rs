//! Calling view methods along the view tree.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::{fractal::Fractal, mixin::MixinDef, registry::ViewId};

pub const NAME: &str = "invoke";

fn method_name(args: &[Value]) -> Result<&str> {
    match args.first() {
        Some(Value::String(s)) => Ok(s),
        _ => bail!("expecting the method name as first argument")
    }
}

pub(crate) fn mixin() -> MixinDef {
    MixinDef::new()
        .method("invoke_up", |fx, view, args| {
            let name = method_name(args)?.to_string();
            Ok(fx.invoke_up(view, &name, &args[1..])?.unwrap_or(Value::Null))
        })
        .method("invoke_down", |fx, view, args| {
            let name = method_name(args)?.to_string();
            Ok(Value::Array(fx.invoke_down(view, &name, &args[1..])?))
        })
}

impl Fractal {
    /// Call `method` on the nearest ancestor that has it. `None` if
    /// there is none.
    pub fn invoke_up(&mut self, view: ViewId, method: &str, args: &[Value]) -> Result<Option<Value>> {
        self.require_mixin(view, NAME)?;
        let mut cur = self.parent(view)?;
        while let Some(p) = cur {
            if self.has_method(p, method) {
                return self.call(p, method, args).map(Some)
            }
            cur = self.parent(p)?;
        }
        Ok(None)
    }

    /// Call `method` on each descendant that has it, not descending
    /// below those. Returns the results in tree order.
    pub fn invoke_down(&mut self, view: ViewId, method: &str, args: &[Value]) -> Result<Vec<Value>> {
        self.require_mixin(view, NAME)?;
        let mut results = Vec::new();
        self.invoke_children(view, method, args, &mut results)?;
        Ok(results)
    }

    fn invoke_children(
        &mut self,
        view: ViewId,
        method: &str,
        args: &[Value],
        results: &mut Vec<Value>
    ) -> Result<()> {
        let children = match self.views.get(view) {
            Some(inst) => inst.children().to_vec(),
            None => return Ok(())
        };
        for child in children {
            if ! self.is_alive(child) {
                continue
            }
            if self.has_method(child, method) {
                results.push(self.call(child, method, args)?);
            } else {
                self.invoke_children(child, method, args, results)?;
            }
        }
        Ok(())
    }
}
