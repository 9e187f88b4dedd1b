//! Parameter Store: the names a template may reference and what is known
//! about their values at preprocessing time.

use indexmap::IndexMap;
use serde_json::Value;

/// Pseudo parameters CloudFormation only fills in when the stack is applied.
const DEFERRED_PSEUDO_PARAMS: [&str; 3] = ["AWS::NotificationARNs", "AWS::NoValue", "AWS::StackId"];

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Resolved(Value),
    /// Exists, but its value is only known once the provider applies the template.
    Unavailable,
}

impl ParamValue {
    pub fn resolved(&self) -> Option<&Value> {
        match self {
            ParamValue::Resolved(value) => Some(value),
            ParamValue::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, ParamValue::Unavailable)
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        ParamValue::Resolved(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Resolved(Value::String(value.to_string()))
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Resolved(Value::String(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    entries: IndexMap<String, ParamValue>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn insert_unavailable(&mut self, name: impl Into<String>) {
        self.entries.insert(name.into(), ParamValue::Unavailable);
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Layers the entries of a mapping on top of the store.
    pub fn overlay(&mut self, locals: &serde_json::Map<String, Value>) {
        for (name, value) in locals {
            self.insert(name.clone(), value.clone());
        }
    }

    /// Builds the store for a template.
    ///
    /// Precedence, lowest first: `Parameters` defaults, `Resources` (always
    /// unavailable), provider resolved values, the sourced snapshot. The
    /// `AWS::` pseudo parameters are derived from the result.
    ///
    /// # Arguments
    /// * `doc` - The (possibly partially expanded) root document
    /// * `base` - Provider region and account plus the sourced snapshot
    ///
    /// # Returns
    /// A store where every declared name is either resolved or marked
    /// unavailable
    pub fn from_template(doc: &Value, base: &BaseParams) -> Self {
        // a template that is itself a merge exposes what has been merged so far
        if let Some(result) = doc.get("Fn::Merge").and_then(|m| m.get("Result")) {
            return Self::from_template(result, base);
        }
        let mut params = ParameterStore::new();

        if let Some(parameters) = doc.get("Parameters") {
            params.add_declared(parameters);
        }
        if let Some(parameters) = doc.get("resources").and_then(|r| r.get("Parameters")) {
            params.insert_unavailable("ServerlessDeploymentBucket");
            params.add_declared(parameters);
        }

        if let Some(resources) = doc.get("Resources") {
            params.add_section(resources, false);
        }
        if let Some(resources) = doc.get("resources").and_then(|r| r.get("Resources")) {
            params.add_section(resources, false);
        }

        params.insert_unavailable("STACK_NAME");
        params.insert_optional("REGION", base.region.as_deref());
        params.insert_optional("ACCOUNT_ID", base.account_id.as_deref());

        for (name, value) in &base.sourced {
            params.insert(name.clone(), value.clone());
        }

        for (pseudo, source) in [
            ("AWS::Region", "REGION"),
            ("AWS::AccountId", "ACCOUNT_ID"),
            ("AWS::StackName", "STACK_NAME"),
        ] {
            let value = params
                .get(source)
                .cloned()
                .unwrap_or(ParamValue::Unavailable);
            params.insert(pseudo, value);
        }
        for pseudo in DEFERRED_PSEUDO_PARAMS {
            params.insert_unavailable(pseudo);
        }
        params
    }

    fn insert_optional(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(value) => self.insert(name, value),
            None => self.insert_unavailable(name),
        }
    }

    /// A `Parameters` block, including one that is still being produced by
    /// an `Fn::Merge` or `Fn::ImportYaml` macro.
    fn add_declared(&mut self, parameters: &Value) {
        self.add_section(parameters, true);
        for macro_key in ["Fn::Merge", "Fn::ImportYaml"] {
            if let Some(result) = parameters.get(macro_key).and_then(|m| m.get("Result")) {
                self.add_section(result, true);
            }
        }
    }

    fn add_section(&mut self, section: &Value, use_default: bool) {
        match section {
            Value::Object(map) => self.add_entries(map, use_default),
            Value::Array(list) => {
                for item in list {
                    if let Value::Object(map) = item {
                        self.add_entries(map, use_default);
                    }
                }
            }
            _ => {}
        }
    }

    fn add_entries(&mut self, map: &serde_json::Map<String, Value>, use_default: bool) {
        for (name, declaration) in map {
            if name.starts_with("Fn::") {
                continue;
            }
            let value = match declaration.get("Default") {
                Some(default) if use_default => ParamValue::Resolved(default.clone()),
                _ => ParamValue::Unavailable,
            };
            self.entries.insert(name.clone(), value);
        }
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ParameterStore {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = ParameterStore::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

/// Values that do not come from the template itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseParams {
    pub region: Option<String>,
    pub account_id: Option<String>,
    /// Property-file values merged with the process environment.
    pub sourced: IndexMap<String, String>,
}
