//! View state: a flat map of JSON values, replaced wholesale on
//! update.

use std::rc::Rc;

use anyhow::{bail, Result};
use kstring::KString;
use serde_json::{Map, Value};

use crate::{fractal::Fractal, registry::ViewId};

pub type State = Map<String, Value>;

/// One key's change in a `StatePatch`.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Set(Value),
    /// Reset the key to its default value, `null` if there is none.
    /// Keys are never removed.
    Unset,
}

/// Partial state passed to `update_state`, applied in insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    entries: Vec<(KString, Patch)>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// From a JSON object; `null` gives the empty patch.
    pub fn from_value(v: Value) -> Result<Self> {
        match v {
            Value::Object(m) => Ok(m.into_iter().collect()),
            Value::Null => Ok(Self::new()),
            v => bail!("state must be a JSON object, got: {v}")
        }
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, Patch::Set(value.into()));
        self
    }

    pub fn unset(mut self, key: &str) -> Self {
        self.insert(key, Patch::Unset);
        self
    }

    /// Replaces an existing entry for `key` in place.
    pub fn insert(&mut self, key: &str, patch: Patch) {
        match self.entries.iter().position(|(k, _)| k.as_str() == key) {
            Some(i) => self.entries[i].1 = patch,
            None => self.entries.push((KString::from_ref(key), patch)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Patch> {
        let i = self.entries.iter().position(|(k, _)| k.as_str() == key)?;
        Some(self.entries.remove(i).1)
    }

    pub fn get(&self, key: &str) -> Option<&Patch> {
        self.entries.iter().find(|(k, _)| k.as_str() == key).map(|(_, p)| p)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_unset(&self) -> bool {
        self.entries.iter().any(|(_, p)| *p == Patch::Unset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Patch)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p))
    }
}

impl FromIterator<(String, Value)> for StatePatch {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut patch = StatePatch::new();
        for (k, v) in iter {
            patch.insert(&k, Patch::Set(v));
        }
        patch
    }
}

impl From<State> for StatePatch {
    fn from(state: State) -> Self {
        state.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Start from the default state instead of the current one.
    pub reset: bool,
}

pub type ComputeState = Rc<dyn Fn(&Fractal, ViewId) -> Result<State>>;

/// Declared default state of a view class.
#[derive(Clone)]
pub enum DefaultState {
    Map(State),
    /// Evaluated per instance, each time defaults are needed.
    Computed(ComputeState),
}

impl std::fmt::Debug for DefaultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultState::Map(m) => f.debug_tuple("Map").field(m).finish(),
            DefaultState::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl DefaultState {
    /// Own defaults shallow-merged over the parent's. Only plain maps
    /// are merged; otherwise the own declaration wins.
    pub fn merge(parent: Option<&DefaultState>, own: Option<DefaultState>) -> Option<DefaultState> {
        match (parent, own) {
            (Some(DefaultState::Map(p)), Some(DefaultState::Map(o))) => {
                let mut m = p.clone();
                for (k, v) in o {
                    m.insert(k, v);
                }
                Some(DefaultState::Map(m))
            }
            (_, Some(own)) => Some(own),
            (parent, None) => parent.cloned(),
        }
    }
}

/// The top-level keys of `new` whose values differ from `old`.
pub fn diff(old: &State, new: &State) -> State {
    new.iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Truthiness the way script values have it.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0. && ! f.is_nan()),
        Value::String(s) => ! s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn number_to_string(f: f64) -> String {
    if f.is_finite() && f.fract() == 0. && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

/// The string form of a value as it appears in markup: strings
/// verbatim, integral numbers without fraction, null as empty.
pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                n.to_string()
            } else {
                n.as_f64().map_or_else(|| n.to_string(), number_to_string)
            }
        }
        Value::String(s) => s.clone(),
        Value::Array(a) => a.iter().map(value_to_string).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".into(),
    }
}
