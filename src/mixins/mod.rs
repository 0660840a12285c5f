//! The mixins every context starts out with.

pub mod events;
pub mod invoke;
pub mod query;
pub mod variables;

use crate::{fractal::Fractal, mixin::MixinDef, warn};

pub(crate) fn register_builtin(fx: &mut Fractal) {
    let builtin: [(&str, MixinDef); 4] = [
        (variables::NAME, variables::mixin()),
        (events::NAME, events::mixin()),
        (invoke::NAME, invoke::mixin()),
        (query::NAME, query::mixin()),
    ];
    for (name, def) in builtin {
        if let Err(e) = fx.define_mixin(name, def) {
            warn!("built-in mixin {name:?}: {e}");
        }
    }
}
