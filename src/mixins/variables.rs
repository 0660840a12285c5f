//! Variable substitution over a view's nodes after each render.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::{fractal::Fractal,
            mixin::{LifecyclePoint, MixinDef},
            registry::ViewId,
            state::State,
            variables::parse_elements};

pub const NAME: &str = "variables";

/// A view method of this name, if present, supplies the values
/// instead of the view's state.
pub const STATE_METHOD: &str = "variables_state";

pub(crate) fn mixin() -> MixinDef {
    MixinDef::new()
        .hook(LifecyclePoint::AfterRender, |fx, view, _| fx.replace_variables(view))
        .method("replace_variables", |fx, view, _| {
            fx.replace_variables(view)?;
            Ok(Value::Null)
        })
}

impl Fractal {
    /// Substitute `{variables}` in the view's fragment nodes.
    pub fn replace_variables(&mut self, view: ViewId) -> Result<()> {
        let state = if self.has_method(view, STATE_METHOD) {
            match self.call(view, STATE_METHOD, &[])? {
                Value::Object(m) => m,
                Value::Null => State::new(),
                v => bail!("{STATE_METHOD} must return an object, got: {v}")
            }
        } else {
            self.instance(view)?.state().clone()
        };
        let nodes = self.instance(view)?.fragment_nodes().to_vec();
        parse_elements(&mut self.dom, &nodes, &state, &self.modifiers,
                       &self.config.clone_attribute)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use fdom::{inner_html_string, Print};
    use serde_json::json;
    use crate::{config::FractalConfig, registry::ViewDef, state::StatePatch};

    #[test]
    fn t_render_with_variables() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        let body = fx.load_markup(
            "<body><template data-name=\"list\"><ul class=\"{cls}\">\
               <template data-name=\"item\"><li>{name.upper()}</li></template>\
             </ul></template></body>")?;
        fx.scan(body)?;
        fx.define(ViewDef::new("list").mixin(NAME))?;
        fx.define(ViewDef::new("list.item").mixin(NAME))?;
        let root = fx.root()?;
        let list = fx.append(root, "list", StatePatch::new().set("cls", "c"))?;
        fx.append(list, "item", StatePatch::new().set("name", "a"))?;
        fx.append(list, "item", StatePatch::new().set("name", "b"))?;
        let ul = fx.fragment_nodes(list)?[0];
        assert_eq!(ul.to_html_fragment_string(fx.dom())?,
                   "<ul class=\"c\" data-clone=\"true\">\
                    <template data-name=\"item\" data-ref=\"list.item\"></template>\
                    <li data-clone=\"true\">A</li><li data-clone=\"true\">B</li></ul>");

        // re-rendering the list destroys its items
        fx.update_state(list, StatePatch::new().set("cls", "d"))?;
        let ul = fx.fragment_nodes(list)?[0];
        assert_eq!(ul.to_html_fragment_string(fx.dom())?,
                   "<ul class=\"d\" data-clone=\"true\">\
                    <template data-name=\"item\" data-ref=\"list.item\"></template></ul>");
        Ok(())
    }

    #[test]
    fn t_state_method() -> Result<()> {
        let mut fx = Fractal::new(FractalConfig::default());
        let body = fx.load_markup(
            "<body><template data-name=\"a\"><p>{x}</p></template></body>")?;
        fx.scan(body)?;
        fx.define(ViewDef::new("a").mixin(NAME)
                  .method(STATE_METHOD, |fx, view, _| {
                      let n = fx.state_value(view, "n")?.as_i64().unwrap_or(0);
                      Ok(json!({"x": n * 10}))
                  }))?;
        let root = fx.root()?;
        fx.append(root, "a", StatePatch::new().set("n", 4))?;
        assert_eq!(inner_html_string(fx.dom(), body)?,
                   "<template data-name=\"a\" data-ref=\"a\"></template>\
                    <p data-clone=\"true\">40</p>");
        Ok(())
    }
}
