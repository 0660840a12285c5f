//! Variable substitution in text and attribute values:
//!
//!   `{var}`               the value of state key `var`
//!   `{var.mod(args)}`     the value after running through modifier(s)
//!   `{'string'}`          the string itself
//!   `{'string'.mod()}`    the string after running through modifier(s)
//!
//! Modifier arguments are literals: quoted strings, numbers, `true`,
//! `false`, `null`.

use std::{collections::BTreeMap, rc::Rc};

use anyhow::Result;
use chrono::{DateTime, Datelike, LocalResult, TimeZone, Timelike, Utc};
use fdom::{Dom, IntoKString, NodeId};
use kstring::KString;
use serde_json::{Number, Value};

use crate::{error::FractalErrorKind,
            state::{is_truthy, value_to_string, State}};

/// The value being worked on by a modifier chain.
pub struct Variable<'s> {
    pub value: Value,
    /// The state the variable was resolved from.
    pub state: &'s State,
}

pub type Modifier = Rc<dyn Fn(&mut Variable<'_>, &[Value]) -> Result<()>>;

#[derive(Clone, Default)]
pub struct Modifiers(BTreeMap<KString, Modifier>);

impl Modifiers {
    pub fn new() -> Self {
        Self::default()
    }

    /// `default`, `prepend`, `upper`, `upperFirst`, `date`,
    /// `datetime`, `yesNo`, `yesNoEmpty`.
    pub fn with_defaults() -> Self {
        let mut m = Self::new();
        m.register("default", |var, args| {
            if is_empty(&var.value) {
                var.value = args.first().cloned().unwrap_or(Value::Null);
            }
            Ok(())
        });
        m.register("prepend", |var, args| {
            let prefix = args.first().map(value_to_string).unwrap_or_default();
            var.value = Value::String(prefix + &value_to_string(&var.value));
            Ok(())
        });
        m.register("upper", |var, _args| {
            var.value = Value::String(value_to_string(&var.value).to_uppercase());
            Ok(())
        });
        m.register("upperFirst", |var, _args| {
            let s = value_to_string(&var.value);
            let mut cs = s.chars();
            if let Some(c) = cs.next() {
                var.value = Value::String(c.to_uppercase().chain(cs).collect());
            }
            Ok(())
        });
        m.register("date", |var, args| date_modifier(var, args, "j M Y"));
        m.register("datetime", |var, args| date_modifier(var, args, "j M Y H:i"));
        m.register("yesNo", |var, _args| {
            var.value = yes_no(&var.value);
            Ok(())
        });
        m.register("yesNoEmpty", |var, _args| {
            if ! var.value.is_null() {
                var.value = yes_no(&var.value);
            }
            Ok(())
        });
        m
    }

    /// Add or replace the modifier `name`.
    pub fn register(
        &mut self,
        name: impl IntoKString,
        f: impl Fn(&mut Variable<'_>, &[Value]) -> Result<()> + 'static
    ) {
        self.0.insert(name.into_kstring(), Rc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&Modifier> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false
    }
}

fn yes_no(v: &Value) -> Value {
    Value::String(if is_truthy(v) { "yes" } else { "no" }.into())
}

const MONTHS_SHORT: [&str; 12] =
    ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

const WDAYS_SHORT: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Epoch milliseconds from a number or numeric string.
fn epoch_millis(v: &Value) -> Option<i64> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None
    };
    if f.is_finite() {
        Some(f as i64)
    } else {
        None
    }
}

/// Format `dt` with PHP `date()` style letters; `\` escapes the next
/// character, everything else is copied.
pub fn format_date(dt: &DateTime<Utc>, format: &str) -> String {
    let mut out = String::new();
    let mut cs = format.chars();
    while let Some(c) = cs.next() {
        match c {
            'j' => out.push_str(&dt.day().to_string()),
            'd' => out.push_str(&format!("{:02}", dt.day())),
            'D' => out.push_str(WDAYS_SHORT[dt.weekday().num_days_from_monday() as usize]),
            'M' => out.push_str(MONTHS_SHORT[dt.month0() as usize]),
            'm' => out.push_str(&format!("{:02}", dt.month())),
            'n' => out.push_str(&dt.month().to_string()),
            'Y' => out.push_str(&dt.year().to_string()),
            'y' => out.push_str(&format!("{:02}", dt.year().rem_euclid(100))),
            'H' => out.push_str(&format!("{:02}", dt.hour())),
            'i' => out.push_str(&format!("{:02}", dt.minute())),
            's' => out.push_str(&format!("{:02}", dt.second())),
            '\\' => if let Some(c) = cs.next() {
                out.push(c)
            },
            c => out.push(c)
        }
    }
    out
}

/// Falsy and non-numeric values are left alone.
fn date_modifier(var: &mut Variable<'_>, args: &[Value], default_format: &str) -> Result<()> {
    if ! is_truthy(&var.value) {
        return Ok(())
    }
    let ms = match epoch_millis(&var.value) {
        Some(ms) => ms,
        None => return Ok(())
    };
    let dt = match Utc.timestamp_millis_opt(ms) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(dt, _) => dt,
        LocalResult::None => return Ok(())
    };
    let format = match args.first() {
        Some(Value::String(s)) => s.as_str(),
        _ => default_format
    };
    var.value = Value::String(format_date(&dt, format));
    Ok(())
}

// ----------------------------------------------------------------------
// Parsing

struct VarMatch<'t> {
    quoted: bool,
    name: &'t str,
    /// Byte position and text of the `.mod(..)` chain.
    chain: Option<(usize, &'t str)>,
    end: usize,
}

/// Match `{('?)([^}.]+)\1(\.[^}]+)?}` at `start`.
fn match_variable(text: &str, start: usize) -> Option<VarMatch<'_>> {
    let name_start = start + 1;
    let name_len = text[name_start..].find(|c| c == '}' || c == '.')?;
    let raw = &text[name_start..name_start + name_len];
    let (quoted, name) = match raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) if ! inner.is_empty() => (true, inner),
        _ => (false, raw)
    };
    if name.is_empty() {
        return None
    }
    let mut pos = name_start + name_len;
    let chain = if text[pos..].starts_with('.') {
        let len = text[pos..].find('}')?;
        if len < 2 {
            return None
        }
        let chain = (pos, &text[pos..pos + len]);
        pos += len;
        Some(chain)
    } else {
        None
    };
    if ! text[pos..].starts_with('}') {
        return None
    }
    Some(VarMatch { quoted, name, chain, end: pos + 1 })
}

struct ModifierCall {
    name: String,
    args: Vec<Value>,
}

struct ChainParser<'t> {
    source: &'t str,
    /// Position of `s` in `source`.
    base: usize,
    s: &'t str,
    pos: usize,
}

impl<'t> ChainParser<'t> {
    fn error(&self, message: impl Into<String>) -> anyhow::Error {
        FractalErrorKind::VariableSyntax {
            source_text: self.source.into(),
            position: self.base + self.pos,
            message: message.into(),
        }.error()
    }

    fn peek(&self) -> Option<char> {
        self.s[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expecting {c:?}")))
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().map_or(false, |c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'t str {
        let start = self.pos;
        while self.peek().map_or(false, &pred) {
            self.bump();
        }
        &self.s[start..self.pos]
    }

    fn ident(&mut self) -> Result<&'t str> {
        let id = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if id.is_empty() || id.starts_with(|c: char| c.is_ascii_digit()) {
            Err(self.error("expecting a modifier name"))
        } else {
            Ok(id)
        }
    }

    fn string(&mut self, quote: char) -> Result<Value> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) if c == quote => return Ok(Value::String(out)),
                Some(c) => out.push(c),
            }
        }
    }

    fn literal(&mut self) -> Result<Value> {
        match self.peek() {
            Some(q @ ('\'' | '"')) => {
                self.bump();
                self.string(q)
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let start = self.pos;
                let s = self.take_while(
                    |c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
                if let Ok(i) = s.parse::<i64>() {
                    return Ok(i.into())
                }
                s.parse::<f64>().ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        self.pos = start;
                        self.error(format!("invalid number {s:?}"))
                    })
            }
            Some(_) => {
                let word = self.take_while(|c| c.is_ascii_alphabetic());
                match word {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" | "undefined" => Ok(Value::Null),
                    _ => Err(self.error("expecting a literal argument"))
                }
            }
            None => Err(self.error("expecting an argument"))
        }
    }

    /// `.name(args)` repeated.
    fn calls(mut self) -> Result<Vec<ModifierCall>> {
        let mut calls = Vec::new();
        self.skip_ws();
        while self.peek().is_some() {
            self.expect('.')?;
            let name = self.ident()?.to_string();
            self.skip_ws();
            self.expect('(')?;
            self.skip_ws();
            let mut args = Vec::new();
            if ! self.eat(')') {
                loop {
                    self.skip_ws();
                    args.push(self.literal()?);
                    self.skip_ws();
                    if self.eat(')') {
                        break
                    }
                    self.expect(',')?;
                }
            }
            calls.push(ModifierCall { name, args });
            self.skip_ws();
        }
        Ok(calls)
    }
}

fn expand(text: &str, m: &VarMatch<'_>, state: &State, modifiers: &Modifiers) -> Result<String> {
    if m.quoted && m.chain.is_none() {
        return Ok(m.name.to_string())
    }
    let value = if m.quoted {
        Value::String(m.name.into())
    } else {
        state.get(m.name).cloned().unwrap_or(Value::Null)
    };
    let value = match m.chain {
        None => value,
        Some((base, chain)) => {
            let calls = ChainParser { source: text, base, s: chain, pos: 0 }.calls()?;
            let mut var = Variable { value, state };
            for call in calls {
                let f = modifiers.get(&call.name).ok_or_else(
                    || FractalErrorKind::UnknownModifier { name: call.name.into_kstring() }.error())?;
                f(&mut var, &call.args)?;
            }
            var.value
        }
    };
    Ok(value_to_string(&value))
}

/// Replace all variables in `text`. Braces that don't form a variable
/// are kept.
pub fn parse(text: &str, state: &State, modifiers: &Modifiers) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;
    while let Some(off) = text[i..].find('{') {
        let start = i + off;
        match match_variable(text, start) {
            Some(m) => {
                out.push_str(&text[copied..start]);
                out.push_str(&expand(text, &m, state, modifiers)?);
                i = m.end;
                copied = m.end;
            }
            None => i = start + 1
        }
    }
    out.push_str(&text[copied..]);
    Ok(out)
}

/// Substitute variables in the non-blank text nodes and all attribute
/// values of `nodes` and below. Below the top level, elements carrying
/// `clone_attribute` belong to other views and are not entered.
pub fn parse_elements(
    dom: &mut Dom,
    nodes: &[NodeId],
    state: &State,
    modifiers: &Modifiers,
    clone_attribute: &str
) -> Result<()> {
    parse_nodes(dom, nodes, state, modifiers, clone_attribute, false)
}

fn parse_nodes(
    dom: &mut Dom,
    nodes: &[NodeId],
    state: &State,
    modifiers: &Modifiers,
    clone_attribute: &str,
    ignore_clones: bool
) -> Result<()> {
    for node in nodes {
        if let Some(t) = dom.text(*node) {
            if ! t.trim().is_empty() {
                let new = parse(t, state, modifiers)?;
                if new != t {
                    dom.set_text(*node, new)?;
                }
            }
        } else if dom.is_element(*node) {
            for (k, v) in dom.attributes(*node).to_vec() {
                let new = parse(&v, state, modifiers)?;
                if new != v.as_str() {
                    dom.set_attribute(*node, k, new)?;
                }
            }
            let has_children = dom.first_child(*node).is_some();
            if (has_children && ! ignore_clones) || ! dom.has_attribute(*node, clone_attribute) {
                let children = dom.children(*node).to_vec();
                parse_nodes(dom, &children, state, modifiers, clone_attribute, true)?;
            }
        }
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use fdom::{Print, TemplateMode};
    use serde_json::json;
    use crate::error::error_kind;

    fn state(v: Value) -> State {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object")
        }
    }

    fn p(text: &str, st: Value) -> Result<String> {
        parse(text, &state(st), &Modifiers::with_defaults())
    }

    #[test]
    fn t_parse() -> Result<()> {
        assert_eq!(p("{name.upper()}", json!({"name": "abc"}))?, "ABC");
        assert_eq!(p("Hi {name}!", json!({"name": "Bob"}))?, "Hi Bob!");
        assert_eq!(p("{missing}|{n}|{f}", json!({"n": 3, "f": 1.5}))?, "|3|1.5");
        assert_eq!(p("{'lit'}", json!({}))?, "lit");
        assert_eq!(p("{'lit'.upperFirst()}", json!({}))?, "Lit");
        assert_eq!(p("{a.default('none')} {b.default(\"x\")}", json!({"a": ""}))?, "none x");
        assert_eq!(p("{a.prepend('#').upper()}", json!({"a": "id"}))?, "#ID");
        // not variables
        assert_eq!(p("{} {.x} {a", json!({"a": 1}))?, "{} {.x} {a");
        assert_eq!(p("{{a}}", json!({"{a": "x"}))?, "x}");
        Ok(())
    }

    #[test]
    fn t_yes_no() -> Result<()> {
        let st = json!({"t": true, "z": 0, "n": null, "s": "x"});
        assert_eq!(p("{t.yesNo()} {z.yesNo()} {s.yesNo()} {n.yesNo()}", st.clone())?,
                   "yes no yes no");
        assert_eq!(p("{n.yesNoEmpty()}|{missing.yesNoEmpty()}|{z.yesNoEmpty()}", st)?,
                   "||no");
        Ok(())
    }

    #[test]
    fn t_date() -> Result<()> {
        // 2021-03-04 05:06:07 UTC, a Thursday
        let st = json!({"t": 1614834367000i64, "s": "1614834367000", "zero": 0, "x": "abc"});
        assert_eq!(p("{t.date()}", st.clone())?, "4 Mar 2021");
        assert_eq!(p("{s.datetime()}", st.clone())?, "4 Mar 2021 05:06");
        assert_eq!(p("{t.date('D, d.m.y H:i:s')}", st.clone())?, "Thu, 04.03.21 05:06:07");
        assert_eq!(p("{t.date('n/j/Y \\\\a\\\\t H')}", st.clone())?, "3/4/2021 at 05");
        assert_eq!(p("{zero.date()}|{x.date()}|{missing.date()}", st)?, "0|abc|");
        Ok(())
    }

    #[test]
    fn t_errors() {
        let e = p("{a.nope()}", json!({})).err().unwrap();
        assert_eq!(e.to_string(), "unknown modifier \"nope\"");
        let e = p("ab {a.upper(}", json!({})).err().unwrap();
        assert!(matches!(error_kind(&e),
                         Some(FractalErrorKind::VariableSyntax { position: 12, .. })));
        for bad in ["{a.upper}", "{a.upper(1 2)}", "{a.default('x)}", "{a.9x()}", "{a.default(foo)}"] {
            let e = p(bad, json!({})).err().unwrap();
            assert!(matches!(error_kind(&e), Some(FractalErrorKind::VariableSyntax { .. })),
                    "{bad}: {e}");
        }
    }

    #[test]
    fn t_custom_modifier() -> Result<()> {
        let mut m = Modifiers::with_defaults();
        m.register("plus", |var, args| {
            let a = var.value.as_i64().unwrap_or(0);
            let b = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
            var.value = json!(a + b);
            Ok(())
        });
        m.register("fromState", |var, args| {
            let key = args.first().and_then(|v| v.as_str()).unwrap_or("");
            var.value = var.state.get(key).cloned().unwrap_or(Value::Null);
            Ok(())
        });
        let st = state(json!({"n": 40, "other": "o"}));
        assert_eq!(parse("{n.plus(2)}", &st, &m)?, "42");
        assert_eq!(parse("{n.fromState('other').upper()}", &st, &m)?, "O");
        assert!(m.names().any(|n| n == "plus"));
        Ok(())
    }

    #[test]
    fn t_parse_elements() -> Result<()> {
        let mut dom = Dom::new(TemplateMode::Native);
        let frag = dom.parse_fragment(
            "<p title=\"{t}\" data-clone=\"true\">{a} <b>{a}</b>\
             <span data-clone=\"true\">{a}</span></p>\
             <i data-clone=\"true\">{a}</i>")?;
        let nodes = dom.children(frag).to_vec();
        let st = state(json!({"a": "A", "t": "T"}));
        parse_elements(&mut dom, &nodes, &st, &Modifiers::with_defaults(), "data-clone")?;
        assert_eq!(frag.to_html_fragment_string(&dom)?,
                   "<p data-clone=\"true\" title=\"T\">A <b>A</b>\
                    <span data-clone=\"true\">{a}</span></p>\
                    <i data-clone=\"true\">A</i>");
        Ok(())
    }
}
