use indexmap::IndexSet;
use serde_json::Value;

use crate::params::{ParamValue, ParameterStore};
use crate::session::{Diagnostic, NodePath};

/// Provenance keys attached to `Ref` nodes while macros are expanded.
pub const SOURCE_KEY: &str = "__source";
pub const OPTIONAL_KEY: &str = "__optional";
pub const DEFAULT_KEY: &str = "__default";

/// Validates (or, when `resolve` is set, inlines) every `Ref` in a document
/// against a Parameter Store.
///
/// Unresolvable references are collected as diagnostics rather than failing
/// the walk, so a single run reports every broken reference. Provenance keys
/// are stripped from all `Ref` nodes regardless of the outcome.
pub struct ReferenceChecker<'a> {
    template_file: &'a str,
    params: &'a ParameterStore,
    resolve: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ReferenceChecker<'a> {
    pub fn new(template_file: &'a str, params: &'a ParameterStore, resolve: bool) -> Self {
        ReferenceChecker {
            template_file,
            params,
            resolve,
            diagnostics: Vec::new(),
        }
    }

    pub fn check(&mut self, value: Value, path: &NodePath) -> Value {
        match value {
            Value::Object(mut map) if map.contains_key("Ref") => {
                let source = match map.shift_remove(SOURCE_KEY) {
                    Some(Value::String(source)) => source,
                    _ => "unknown".to_string(),
                };
                let optional = map.contains_key(OPTIONAL_KEY);
                let default = map.shift_remove(DEFAULT_KEY);
                map.shift_remove(OPTIONAL_KEY);

                let name = match map.get("Ref") {
                    Some(Value::String(name)) => name.clone(),
                    other => {
                        let shown = other.map(Value::to_string).unwrap_or_default();
                        self.report(
                            path,
                            format!("Ref must name a parameter, found {} in file {}", shown, source),
                        );
                        return Value::Object(map);
                    }
                };

                let params = self.params;
                match params.get(&name) {
                    None if optional => default.unwrap_or_else(|| Value::String(String::new())),
                    None => {
                        self.report(
                            path,
                            format!(
                                "Referenced parameter \"{}\" in file {} not declared in template parameters in {}",
                                name, source, self.template_file
                            ),
                        );
                        Value::Object(map)
                    }
                    Some(ParamValue::Resolved(value)) if self.resolve => value.clone(),
                    Some(ParamValue::Unavailable) if self.resolve => {
                        self.report(
                            path,
                            format!(
                                "Referenced parameter \"{}\" in file {} is resolved later by AWS; cannot resolve its value now",
                                name, source
                            ),
                        );
                        Value::Object(map)
                    }
                    Some(_) => Value::Object(map),
                }
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, val)| {
                        let checked = self.check(val, &path.key(&key));
                        (key, checked)
                    })
                    .collect(),
            ),
            Value::Array(array) => Value::Array(
                array
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| self.check(item, &path.index(i)))
                    .collect(),
            ),
            // Strings, numbers, bools, and null pass through unchanged
            _ => value,
        }
    }

    fn report(&mut self, path: &NodePath, message: String) {
        self.diagnostics.push(Diagnostic {
            path: path.to_string(),
            message,
        });
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Names of every `Ref` in the document, first occurrence order, no duplicates.
pub fn get_refs(value: &Value) -> Vec<String> {
    let mut refs = IndexSet::new();
    collect_refs(value, &mut refs);
    refs.into_iter().collect()
}

fn collect_refs(value: &Value, refs: &mut IndexSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(name) = map.get("Ref").and_then(Value::as_str) {
                refs.insert(name.to_string());
            }
            for value in map.values() {
                collect_refs(value, refs);
            }
        }
        Value::Array(arr) => {
            for item in arr {
                collect_refs(item, refs);
            }
        }
        _ => {}
    }
}
