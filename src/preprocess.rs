//! Macro Processor: expands `Fn::ImportFile`, `Fn::ImportYaml`,
//! `Fn::Merge` and `StackRef`, tags `Ref` nodes with their source file and
//! substitutes parameter references bottom-up.

use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::expand::{expand_vars, referenced_names, text_of};
use crate::params::{ParamValue, ParameterStore};
use crate::reference_checker::{ReferenceChecker, SOURCE_KEY};
use crate::script::{apply_source, import_script};
use crate::session::{NodePath, PreprocessingSession};
use crate::template::load_template;

const IMPORT_FILE: &str = "Fn::ImportFile";
const IMPORT_YAML: &str = "Fn::ImportYaml";
const MERGE: &str = "Fn::Merge";
const STACK_REF: &str = "StackRef";
const MAX_EXPANSION_PASSES: usize = 64;

/// Runs the whole pipeline on a loaded template: variable expansion, macro
/// expansion and reference validation.
///
/// Deferred errors are returned together as [`Error::Aggregated`] once the
/// document has been fully processed.
///
/// # Arguments
/// * `doc` - The template as loaded by [`crate::template::load_template`]
/// * `basefile` - Path of the template, used to resolve relative imports
///   and named in diagnostics
/// * `session` - Per-run state: provider, include paths and caches
///
/// # Returns
/// The expanded document with all provenance keys stripped, a fatal
/// [`Error`] from a failed lookup or malformed macro, or
/// [`Error::Aggregated`] listing every deferred error
pub fn import_scripts(
    doc: Value,
    basefile: &Path,
    session: &mut PreprocessingSession<'_>,
) -> Result<Value> {
    session.begin(&doc, basefile)?;
    let doc = expand_vars(&doc, &session.params());
    session.reset_root(&doc);

    let doc = MacroProcessor::new(session).process(doc, basefile, &NodePath::root())?;

    session.reset_root(&doc);
    let params = session.params();
    let template_file = basefile.display().to_string();
    let mut checker = ReferenceChecker::new(&template_file, &params, false);
    let doc = checker.check(doc, &NodePath::root());
    session.extend_diagnostics(checker.into_diagnostics());

    let diagnostics = session.take_diagnostics();
    if !diagnostics.is_empty() {
        return Err(Error::Aggregated(diagnostics));
    }
    Ok(doc)
}

pub struct MacroProcessor<'s, 'p> {
    session: &'s mut PreprocessingSession<'p>,
}

impl<'s, 'p> MacroProcessor<'s, 'p> {
    pub fn new(session: &'s mut PreprocessingSession<'p>) -> Self {
        MacroProcessor { session }
    }

    /// Expands the macros in `node`, which sits at `path` in a document
    /// read from `basefile`.
    pub fn process(&mut self, node: Value, basefile: &Path, path: &NodePath) -> Result<Value> {
        match node {
            Value::Object(map) => {
                if map.contains_key(IMPORT_FILE) {
                    Ok(self.import_file(map, basefile, path))
                } else if map.contains_key(IMPORT_YAML) {
                    self.import_yaml(map, basefile, path)
                } else if map.contains_key(MERGE) {
                    self.merge(map, basefile, path)
                } else if map.contains_key(STACK_REF) {
                    self.stack_ref(map, basefile, path)
                } else if map.contains_key("Ref") {
                    let mut map = map;
                    map.insert(SOURCE_KEY.to_string(), json!(basefile.display().to_string()));
                    Ok(Value::Object(map))
                } else {
                    self.mapping(map, basefile, path)
                }
            }
            Value::Array(list) => {
                let mut processed = Vec::with_capacity(list.len());
                for (i, item) in list.into_iter().enumerate() {
                    let item_path = path.index(i);
                    let item = self.process(item, basefile, &item_path)?;
                    self.session.commit(&item_path, &item);
                    processed.push(item);
                }
                Ok(Value::Array(processed))
            }
            other => Ok(other),
        }
    }

    fn mapping(
        &mut self,
        mut map: Map<String, Value>,
        basefile: &Path,
        path: &NodePath,
    ) -> Result<Value> {
        // Parameters go first so the rest of the mapping sees what they declare
        if let Some(parameters) = map.get_mut("Parameters").map(Value::take) {
            let param_path = path.key("Parameters");
            let parameters = self.process(parameters, basefile, &param_path)?;
            self.session.commit(&param_path, &parameters);
            map.insert("Parameters".to_string(), parameters);
        }

        let keys: Vec<String> = map.keys().filter(|k| *k != "Parameters").cloned().collect();
        for key in keys {
            let Some(child) = map.get_mut(&key).map(Value::take) else {
                continue;
            };
            let child_path = path.key(&key);
            let processed = self.process(child, basefile, &child_path)?;
            let expanded = expand_vars(&processed, &self.session.params());
            self.session.commit(&child_path, &expanded);
            map.insert(key, expanded);
        }
        Ok(Value::Object(map))
    }

    fn import_file(&mut self, map: Map<String, Value>, basefile: &Path, path: &NodePath) -> Value {
        let requested = map.get(IMPORT_FILE).cloned().unwrap_or(Value::Null);
        let name = expand_vars(&requested, &self.session.params());
        let resolved = name
            .as_str()
            .and_then(|name| self.session.includes().resolve_file(name, basefile));

        let Some(script) = resolved else {
            self.session.error(
                path,
                format!(
                    "Can't import file \"{}\" - file not found on include paths or relative to {}",
                    display(&requested),
                    basefile.display()
                ),
            );
            return Value::Object(map);
        };

        debug!(script = %script.display(), "importing script");
        match import_script(&script) {
            Ok(parts) => json!({"Fn::Join": ["", parts]}),
            Err(err) => {
                self.session.error(path, err.to_string());
                Value::Object(map)
            }
        }
    }

    fn import_yaml(
        &mut self,
        mut map: Map<String, Value>,
        basefile: &Path,
        path: &NodePath,
    ) -> Result<Value> {
        let requested = map.shift_remove(IMPORT_YAML).unwrap_or(Value::Null);
        let name = expand_vars(&requested, &self.session.params());
        let resolved = name
            .as_str()
            .and_then(|name| self.session.includes().resolve_file(name, basefile));

        let Some(yaml_file) = resolved else {
            if map.get("optional").is_some_and(is_truthy) {
                debug!(file = %display(&requested), "optional import not found");
                return Ok(Value::Object(Map::new()));
            }
            self.session.error(
                path,
                format!(
                    "Can't import file \"{}\" - file not found on include paths or relative to {}",
                    display(&requested),
                    basefile.display()
                ),
            );
            map.shift_remove("optional");
            return Ok(Value::Object(map));
        };

        debug!(file = %yaml_file.display(), "importing yaml");
        let contents = load_template(&yaml_file)?;

        // sibling keys act as parameters local to the imported document
        let mut local_params = (*self.session.params()).clone();
        local_params.overlay(&map);
        let contents = expand_vars(&contents, &local_params);

        let in_progress = |contents: &Value| {
            let mut node = map.clone();
            node.insert(IMPORT_YAML.to_string(), json!({"Result": contents}));
            Value::Object(node)
        };
        let contents = self.settle(contents, path, in_progress);

        match contents {
            Value::Object(entries) => {
                self.session.commit(path, &Value::Object(Map::new()));
                let mut result = Map::new();
                for (key, value) in entries {
                    let child_path = path.key(&key);
                    let value = self.process(value, &yaml_file, &child_path)?;
                    self.session.commit(&child_path, &value);
                    result.insert(key, value);
                }
                Ok(Value::Object(result))
            }
            Value::Array(items) => {
                self.session.commit(path, &Value::Array(Vec::new()));
                let mut result = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let item_path = path.index(i);
                    let item = self.process(item, &yaml_file, &item_path)?;
                    self.session.commit(&item_path, &item);
                    result.push(item);
                }
                Ok(Value::Array(result))
            }
            _ => {
                self.session.error(
                    path,
                    format!(
                        "Can't import yaml file \"{}\" that isn't an associative array or a list in file {}",
                        yaml_file.display(),
                        basefile.display()
                    ),
                );
                Ok(Value::Object(Map::new()))
            }
        }
    }

    fn merge(
        &mut self,
        mut map: Map<String, Value>,
        basefile: &Path,
        path: &NodePath,
    ) -> Result<Value> {
        let (source, mut result) = match map.shift_remove(MERGE) {
            Some(Value::Object(mut args)) if args.contains_key("Source") => (
                args.shift_remove("Source").unwrap_or(Value::Null),
                args.shift_remove("Result").unwrap_or_else(|| json!({})),
            ),
            Some(source) => (source, json!({})),
            None => (Value::Null, json!({})),
        };
        let Value::Array(mut source) = source else {
            return Err(Error::MalformedMerge {
                path: path.to_string(),
                file: basefile.display().to_string(),
            });
        };

        let in_progress = |source: &[Value], result: &Value| {
            let mut node = map.clone();
            node.insert(MERGE.to_string(), json!({"Source": source, "Result": result}));
            Value::Object(node)
        };

        while !source.is_empty() {
            let entry = source.remove(0);
            let entry = expand_vars(&entry, &self.session.params());
            let merged = self.process(entry, basefile, &path.detached())?;
            debug!(path = %path, "merging entry");

            if !is_truthy(&result) {
                result = merged;
            } else {
                let mut abandoned = false;
                match (&mut result, merged) {
                    (Value::Object(into), Value::Object(from)) => into.extend(from),
                    (Value::Array(into), Value::Array(from)) => into.extend(from),
                    (into, from) => {
                        let expected = kind(into);
                        if expected == kind(&from) {
                            self.session.error(path, format!("Unsupported {}", expected));
                        } else {
                            let shown = serde_json::to_string_pretty(&from)?;
                            self.session.error(
                                path,
                                format!(
                                    "First Fn::Merge entries were of type {}, but the following entry was not: \n{}\nIn file {}",
                                    expected,
                                    shown,
                                    basefile.display()
                                ),
                            );
                            abandoned = true;
                        }
                    }
                }
                if abandoned {
                    return Ok(result);
                }
            }

            result = self.settle(result, path, |result| in_progress(&source, result));
        }
        Ok(result)
    }

    /// Re-expands `value` against the parameter store until it stops
    /// changing, committing every pass through `wrap` so the store sees the
    /// parameters the value itself declares.
    ///
    /// # Arguments
    /// * `value` - The macro result being settled
    /// * `path` - Where the macro sits in the document
    /// * `wrap` - Builds the in-progress node committed for a given value
    ///
    /// # Returns
    /// The settled value, or the last value reached when a parameter
    /// references itself (reported as a deferred error).
    fn settle(&mut self, mut value: Value, path: &NodePath, wrap: impl Fn(&Value) -> Value) -> Value {
        self.session.commit(path, &wrap(&value));
        for _ in 0..MAX_EXPANSION_PASSES {
            let params = self.session.params();
            if let Some(name) = self_reference(&value, &params) {
                self.session
                    .error(path, format!("Parameter {} references itself", name));
                return value;
            }
            let expanded = expand_vars(&value, &params);
            if expanded == value {
                return value;
            }
            value = expanded;
            self.session.commit(path, &wrap(&value));
        }
        self.session.error(
            path,
            format!(
                "Parameter expansion did not settle after {} passes",
                MAX_EXPANSION_PASSES
            ),
        );
        value
    }

    fn stack_ref(
        &mut self,
        map: Map<String, Value>,
        basefile: &Path,
        path: &NodePath,
    ) -> Result<Value> {
        let lookup = map.get(STACK_REF).cloned().unwrap_or(Value::Null);
        let mut lookup = expand_vars(&lookup, &self.session.params());

        let params = self.session.params();
        let template_file = basefile.display().to_string();
        apply_source(&mut lookup, &template_file, false, "");
        let mut checker = ReferenceChecker::new(&template_file, &params, true);
        let lookup = checker.check(lookup, &path.key(STACK_REF));
        let diagnostics = checker.into_diagnostics();
        if !diagnostics.is_empty() {
            // reported once here; the run fails, so no Ref is left for the final check
            self.session.extend_diagnostics(diagnostics);
            return Ok(Value::Null);
        }

        let field = |name: &str| lookup.get(name).and_then(Value::as_str);
        let (Some(region), Some(stack_name), Some(param_name)) =
            (field("region"), field("stackName"), field("paramName"))
        else {
            return Err(Error::MalformedStackRef {
                path: path.to_string(),
                file: template_file,
            });
        };

        debug!(region, stack_name, param_name, "resolving stack reference");
        let values = self.session.stack_values(region, stack_name)?;
        match values.get(param_name) {
            Some(value) => Ok(json!(value)),
            None => Err(Error::UnknownStackParameter {
                param: param_name.to_string(),
                stack: stack_name.to_string(),
            }),
        }
    }
}

/// A name referenced in `value` whose resolved value references it again.
fn self_reference(value: &Value, params: &ParameterStore) -> Option<String> {
    referenced_names(value).into_iter().find(|name| {
        params
            .get(name)
            .and_then(ParamValue::resolved)
            .is_some_and(|resolved| referenced_names(resolved).contains(name))
    })
}

fn display(value: &Value) -> String {
    text_of(value).unwrap_or_else(|| value.to_string())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(list) => !list.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LookupError, StackValues, StaticProvider};
    use crate::session::tests::offline_options;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::PathBuf;

    fn run(doc: Value, basefile: &Path, provider: &StaticProvider) -> Result<Value> {
        let mut session = PreprocessingSession::new(provider, offline_options());
        import_scripts(doc, basefile, &mut session)
    }

    fn template_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.yaml");
        (dir, template)
    }

    #[test]
    fn test_double_paren_scenario() {
        let (_dir, template) = template_dir();
        let doc = json!({
            "Parameters": {"paramFoo": {"Default": "bar"}},
            "Value": "prefix-((paramFoo))-suffix"
        });
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(
            result,
            json!({
                "Parameters": {"paramFoo": {"Default": "bar"}},
                "Value": "prefix-bar-suffix"
            })
        );
    }

    #[test]
    fn test_default_operator_in_document() {
        let (_dir, template) = template_dir();
        let result = run(json!({"Home": "${HOME:-/root}"}), &template, &StaticProvider::default()).unwrap();
        assert_eq!(result, json!({"Home": "/root"}));
    }

    #[test]
    fn test_import_yaml_with_local_parameters() {
        let (dir, template) = template_dir();
        fs::write(
            dir.path().join("bucket.yaml"),
            "Type: AWS::S3::Bucket\nProperties:\n  BucketName: ((paramEnv))-((bucketSuffix))\n",
        )
        .unwrap();
        let doc = json!({
            "Parameters": {"paramEnv": {"Default": "dev"}},
            "Resources": {
                "Bucket": {"Fn::ImportYaml": "bucket.yaml", "bucketSuffix": "logs"}
            }
        });
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(
            result["Resources"]["Bucket"],
            json!({"Type": "AWS::S3::Bucket", "Properties": {"BucketName": "dev-logs"}})
        );
    }

    #[test]
    fn test_optional_import_missing_is_empty() {
        let (_dir, template) = template_dir();
        let doc = json!({"Resources": {"Extra": {"Fn::ImportYaml": "missing.yaml", "optional": true}}});
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(result, json!({"Resources": {"Extra": {}}}));
    }

    #[test]
    fn test_required_import_missing_is_one_error() {
        let (_dir, template) = template_dir();
        let doc = json!({"Resources": {"Extra": {"Fn::ImportYaml": "missing.yaml"}}});
        let err = run(doc, &template, &StaticProvider::default()).unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].path, "Resources_Extra_");
        assert!(diagnostics[0]
            .message
            .starts_with("Can't import file \"missing.yaml\""));
    }

    #[test]
    fn test_import_yaml_scalar_is_one_error() {
        let (dir, template) = template_dir();
        fs::write(dir.path().join("scalar.yaml"), "hello\n").unwrap();
        let doc = json!({"Resources": {"Extra": {"Fn::ImportYaml": "scalar.yaml"}}});
        let err = run(doc, &template, &StaticProvider::default()).unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].path, "Resources_Extra_");
        assert!(diagnostics[0].message.starts_with("Can't import yaml file"));
    }

    #[test]
    fn test_import_yaml_list() {
        let (dir, template) = template_dir();
        fs::write(dir.path().join("tags.yaml"), "- Key: team\n  Value: ops\n").unwrap();
        let doc = json!({"Tags": {"Fn::ImportYaml": "tags.yaml"}});
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(result, json!({"Tags": [{"Key": "team", "Value": "ops"}]}));
    }

    #[test]
    fn test_parameters_are_processed_first() {
        let (dir, template) = template_dir();
        fs::write(
            dir.path().join("params.yaml"),
            "paramImported:\n  Type: String\n  Default: imported\n",
        )
        .unwrap();
        let doc = json!({
            "Outputs": {"Env": {"Value": "((paramImported))"}},
            "Parameters": {"Fn::ImportYaml": "params.yaml"}
        });
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(result["Outputs"]["Env"]["Value"], json!("imported"));
        assert_eq!(
            result["Parameters"],
            json!({"paramImported": {"Type": "String", "Default": "imported"}})
        );
    }

    #[test]
    fn test_merge_mappings_later_wins() {
        let (_dir, template) = template_dir();
        let doc = json!({"Settings": {"Fn::Merge": [{"a": 1, "b": 1}, {"b": 2, "c": 2}, {"c": 3}]}});
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(result, json!({"Settings": {"a": 1, "b": 2, "c": 3}}));
        let keys: Vec<&String> = result["Settings"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_lists_concatenate() {
        let (_dir, template) = template_dir();
        let doc = json!({"List": {"Fn::Merge": [[1], [2, 3], [4]]}});
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(result, json!({"List": [1, 2, 3, 4]}));
    }

    #[test]
    fn test_merge_resumes_from_partial_result() {
        let (_dir, template) = template_dir();
        let doc = json!({"X": {"Fn::Merge": {"Source": [{"b": 2}], "Result": {"a": 1}}}});
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(result, json!({"X": {"a": 1, "b": 2}}));
    }

    #[test]
    fn test_merge_entries_see_merged_parameters() {
        let (_dir, template) = template_dir();
        let doc = json!({
            "Parameters": {
                "Fn::Merge": [
                    {"paramBase": {"Default": "base"}},
                    {"paramDerived": {"Default": "((paramBase))-derived"}}
                ]
            },
            "Value": "((paramDerived))"
        });
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(result["Parameters"]["paramDerived"]["Default"], json!("base-derived"));
        assert_eq!(result["Value"], json!("base-derived"));
    }

    #[test]
    fn test_merge_type_mismatch_abandons_merge() {
        let (_dir, template) = template_dir();
        let doc = json!({"X": {"Fn::Merge": [{"a": 1}, [2], {"b": 3}]}, "Y": "kept"});
        let err = run(doc, &template, &StaticProvider::default()).unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].path, "X_");
        assert!(diagnostics[0]
            .message
            .starts_with("First Fn::Merge entries were of type mapping"));
    }

    #[test]
    fn test_self_referencing_parameter_stops_expansion() {
        let (_dir, template) = template_dir();
        let doc = json!({"Parameters": {"Fn::Merge": [{"paramA": {"Default": "x-((paramA))"}}]}});
        let err = run(doc, &template, &StaticProvider::default()).unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].path, "Parameters_");
        assert_eq!(diagnostics[0].message, "Parameter paramA references itself");
    }

    #[test]
    fn test_malformed_merge_is_fatal() {
        let (_dir, template) = template_dir();
        let err = run(json!({"X": {"Fn::Merge": "nope"}}), &template, &StaticProvider::default())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedMerge { ref path, .. } if path == "X_"));
    }

    fn network_provider() -> StaticProvider {
        let mut values = StackValues::new();
        values.insert("VPC".to_string(), "vpc-f3bd9896".to_string());
        StaticProvider::default().with_stack("eu-west-1", "infra-network", values)
    }

    fn stack_ref_doc(region: &str, param: &str) -> Value {
        json!({
            "Parameters": {"paramRegion": {"Default": region}},
            "Resources": {
                "Sg": {"Properties": {"VpcId": {"StackRef": {
                    "region": {"Ref": "paramRegion"},
                    "stackName": "infra-network",
                    "paramName": param
                }}}}
            }
        })
    }

    #[test]
    fn test_stack_ref_resolves_output() {
        let (_dir, template) = template_dir();
        let result = run(stack_ref_doc("eu-west-1", "VPC"), &template, &network_provider()).unwrap();
        assert_eq!(result["Resources"]["Sg"]["Properties"]["VpcId"], json!("vpc-f3bd9896"));
    }

    #[test]
    fn test_stack_ref_unknown_parameter_is_fatal() {
        let (_dir, template) = template_dir();
        let err = run(stack_ref_doc("eu-west-1", "Missing"), &template, &network_provider())
            .unwrap_err();
        assert_eq!(err.to_string(), "Did not find value for: Missing in stack infra-network");
    }

    #[test]
    fn test_stack_lookup_failure_is_fatal() {
        let (_dir, template) = template_dir();
        let err = run(stack_ref_doc("us-east-1", "VPC"), &template, &network_provider())
            .unwrap_err();
        assert!(matches!(err, Error::Lookup(LookupError::NotFound { .. })));
    }

    #[test]
    fn test_stack_ref_unresolved_field_is_reported_once() {
        let (_dir, template) = template_dir();
        let doc = json!({
            "Resources": {
                "Sg": {"Properties": {"VpcId": {"StackRef": {
                    "region": {"Ref": "paramMissing"},
                    "stackName": "infra-network",
                    "paramName": "VPC"
                }}}}
            }
        });
        let err = run(doc, &template, &network_provider()).unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].path, "Resources_Sg_Properties_VpcId_StackRef_region_");
        assert_eq!(
            diagnostics[0].message,
            format!(
                "Referenced parameter \"paramMissing\" in file {0} not declared in template parameters in {0}",
                template.display()
            )
        );
    }

    #[test]
    fn test_import_file_becomes_join() {
        let (dir, template) = template_dir();
        fs::write(dir.path().join("init.sh"), "#!/bin/bash\nCF_paramFoo=\"\"\necho hi\n").unwrap();
        let doc = json!({
            "Parameters": {"paramFoo": {"Default": "bar"}},
            "Resources": {"LC": {"Properties": {"UserData": {"Fn::Base64": {"Fn::ImportFile": "init.sh"}}}}}
        });
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(
            result["Resources"]["LC"]["Properties"]["UserData"],
            json!({"Fn::Base64": {"Fn::Join": ["", [
                "#!/bin/bash\n",
                "CF_paramFoo='",
                {"Ref": "paramFoo"},
                "'\n",
                "echo hi\n"
            ]]}})
        );
    }

    #[test]
    fn test_missing_import_file_is_deferred() {
        let (_dir, template) = template_dir();
        let doc = json!({"A": {"Fn::ImportFile": "nope.sh"}, "B": {"Fn::ImportFile": "gone.sh"}});
        let err = run(doc, &template, &StaticProvider::default()).unwrap_err();
        let paths: Vec<&str> = err.diagnostics().iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["A_", "B_"]);
    }

    #[test]
    fn test_unresolved_ref_names_source() {
        let (_dir, template) = template_dir();
        let doc = json!({"Resources": {"X": {"Properties": {"Y": {"Ref": "paramMissing"}}}}});
        let err = run(doc, &template, &StaticProvider::default()).unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].path, "Resources_X_Properties_Y_");
        assert_eq!(
            diagnostics[0].message,
            format!(
                "Referenced parameter \"paramMissing\" in file {0} not declared in template parameters in {0}",
                template.display()
            )
        );
    }

    #[test]
    fn test_output_has_no_provenance() {
        let (dir, template) = template_dir();
        fs::write(dir.path().join("part.yaml"), "Value: !Ref Bucket\n").unwrap();
        let doc = json!({
            "Resources": {"Bucket": {"Type": "AWS::S3::Bucket"}},
            "Outputs": {"Name": {"Fn::ImportYaml": "part.yaml"}, "Region": {"Value": {"Ref": "AWS::Region"}}}
        });
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        let text = result.to_string();
        assert!(!text.contains("__source"));
        assert_eq!(result["Outputs"]["Name"], json!({"Value": {"Ref": "Bucket"}}));
    }

    #[test]
    fn test_intrinsic_arguments_keep_bash_syntax() {
        let (_dir, template) = template_dir();
        let doc = json!({
            "Parameters": {"paramFoo": {"Default": "bar"}},
            "Name": {"Fn::Sub": "${AWS::StackName}-((paramFoo))"}
        });
        let result = run(doc, &template, &StaticProvider::default()).unwrap();
        assert_eq!(result["Name"], json!({"Fn::Sub": "${AWS::StackName}-bar"}));
    }

    #[test]
    fn test_session_is_reusable() {
        let (_dir, template) = template_dir();
        let provider = StaticProvider::default();
        let mut session = PreprocessingSession::new(&provider, offline_options());
        assert!(import_scripts(json!({"x": {"Ref": "nope"}}), &template, &mut session).is_err());
        let ok = import_scripts(json!({"x": "y"}), &template, &mut session).unwrap();
        assert_eq!(ok, json!({"x": "y"}));
    }
}
