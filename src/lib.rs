//! Hierarchical views over nested, named template fragments.
//!
//! A document is scanned once for named templates, which form a tree
//! of dotted paths ("branches"). View classes are registered against
//! branches; view instances clone their branch's content, render it
//! into the document next to a marker left by the scan, and host
//! child views rendered the same way.

pub mod trace;
pub mod error;
pub mod config;
pub mod state;
pub mod branch;
pub mod mixin;
pub mod registry;
pub mod fractal;
pub mod scanner;
pub mod view;
pub mod variables;
pub mod mixins;

pub use fdom;

pub use crate::{branch::{Branch, BranchId, BranchIndex},
                config::FractalConfig,
                error::{error_kind, FractalError, FractalErrorKind},
                fractal::Fractal,
                mixin::{HookArgs, LifecyclePoint, MixinDef},
                registry::{ClassId, ParentView, ViewClass, ViewDef, ViewId},
                state::{Patch, State, StatePatch, UpdateOptions},
                view::{Phase, Placement, ViewInstance},
                variables::{Modifiers, Variable}};
