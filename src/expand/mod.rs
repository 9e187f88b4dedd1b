//! Variable Expander: substitutes `${NAME}` (with bash-like operators) and
//! `((NAME))` references from a [`ParameterStore`].
//!
//! References that cannot be resolved yet, because the name is unknown or
//! its value is only available once the stack is applied, are left as
//! literal text so a later pass can pick them up.

mod transform;

use indexmap::IndexSet;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::trace;

use crate::params::ParameterStore;

pub(crate) use transform::text_of;

lazy_static! {
    static ref ANY_REF: Regex =
        Regex::new(r"\$\{(?P<bash>[^$\{\}]*)\}|\(\((?P<paren>[^()]*)\)\)").unwrap();
    static ref PAREN_REF: Regex = Regex::new(r"\(\((?P<paren>[^()]*)\)\)").unwrap();
    static ref BASH_NAME: Regex =
        Regex::new(r"(?s)^(?P<name>[A-Za-z0-9_.]+(?:::[A-Za-z0-9_.]+)*)(?P<rest>.*)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Full,
    /// Inside intrinsic function arguments `${...}` belongs to CloudFormation.
    DoubleParenOnly,
}

impl Syntax {
    fn pattern(self) -> &'static Regex {
        match self {
            Syntax::Full => &ANY_REF,
            Syntax::DoubleParenOnly => &PAREN_REF,
        }
    }
}

/// Expands every string in a document.
pub fn expand_vars(value: &Value, params: &ParameterStore) -> Value {
    expand_with(value, params, Syntax::Full)
}

/// Expands one string. If the string is exactly one reference the resolved
/// value is returned as is, which may be a mapping or a list.
pub fn expand_str(text: &str, params: &ParameterStore) -> Value {
    process_line(text, params, Syntax::Full)
}

/// Expands one string and always yields text.
pub fn expand_text(text: &str, params: &ParameterStore) -> String {
    match expand_str(text, params) {
        Value::String(s) => s,
        other => text_of(&other).unwrap_or_else(|| other.to_string()),
    }
}

/// Names of every `${NAME}` and `((NAME))` reference in a document, in
/// order of first appearance.
pub fn referenced_names(value: &Value) -> IndexSet<String> {
    let mut names = IndexSet::new();
    collect_names(value, &mut names);
    names
}

fn collect_names(value: &Value, names: &mut IndexSet<String>) {
    match value {
        Value::String(s) => {
            for caps in ANY_REF.captures_iter(s) {
                let name = match (caps.name("bash"), caps.name("paren")) {
                    (Some(inner), _) => BASH_NAME
                        .captures(inner.as_str())
                        .and_then(|parsed| parsed.name("name"))
                        .map(|m| m.as_str().to_string()),
                    (None, Some(inner)) => Some(inner.as_str().trim().to_string()),
                    (None, None) => None,
                };
                if let Some(name) = name {
                    names.insert(name);
                }
            }
        }
        Value::Array(list) => list.iter().for_each(|item| collect_names(item, names)),
        Value::Object(map) => map.values().for_each(|item| collect_names(item, names)),
        _ => {}
    }
}

fn expand_with(value: &Value, params: &ParameterStore, syntax: Syntax) -> Value {
    match value {
        Value::String(s) => process_line(s, params, syntax),
        Value::Array(list) => Value::Array(
            list.iter()
                .map(|item| expand_with(item, params, syntax))
                .collect(),
        ),
        Value::Object(map) => {
            let syntax = if map.keys().any(|k| k.starts_with("Fn::")) {
                Syntax::DoubleParenOnly
            } else {
                syntax
            };
            let expanded: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), expand_with(v, params, syntax)))
                .collect();
            Value::Object(expanded)
        }
        other => other.clone(),
    }
}

fn process_line(text: &str, params: &ParameterStore, syntax: Syntax) -> Value {
    let pattern = syntax.pattern();

    if let Some(caps) = pattern.captures(text) {
        let whole = caps.get(0).map(|m| m.range());
        if whole == Some(0..text.len()) {
            return match resolve(&caps, params) {
                Some(value) => value,
                None => Value::String(text.to_string()),
            };
        }
    } else {
        return Value::String(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&text[last..m.start()]);
        match resolve(&caps, params).as_ref().and_then(text_of) {
            Some(replacement) => out.push_str(&replacement),
            None => out.push_str(m.as_str()),
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    Value::String(out)
}

fn resolve(caps: &Captures, params: &ParameterStore) -> Option<Value> {
    if let Some(inner) = caps.name("bash") {
        let parsed = BASH_NAME.captures(inner.as_str())?;
        let name = parsed.name("name")?.as_str();
        let rest = parsed.name("rest").map_or("", |m| m.as_str());
        let value = transform::apply(params.get(name), rest);
        trace!(reference = inner.as_str(), resolved = value.is_some(), "expand");
        value
    } else {
        let name = caps.name("paren")?.as_str().trim();
        params.get(name).and_then(|v| v.resolved()).cloned()
    }
}
