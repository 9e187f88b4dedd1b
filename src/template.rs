//! Whole-file conversions between YAML templates, CloudFormation JSON and
//! the condensed YAML form with scripts kept in their own files.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::debug;

use crate::cfn_yaml;
use crate::error::{Error, Result};
use crate::preprocess::import_scripts;
use crate::reference_checker::get_refs;
use crate::script::extract_scripts;
use crate::session::PreprocessingSession;

const LAUNCH_CONFIGURATION: &str = "AWS::AutoScaling::LaunchConfiguration";

/// Reads and parses a YAML (or JSON) document.
pub fn load_template(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    cfn_yaml::parse_yaml_to_json(&text).map_err(|err| Error::parse(path, err))
}

/// Loads a template, merging it over `merge` documents when given, and
/// expands it.
pub fn yaml_to_dict(
    file: &Path,
    merge: &[PathBuf],
    session: &mut PreprocessingSession<'_>,
) -> Result<Value> {
    let mut doc = load_template(file)?;
    if !merge.is_empty() {
        let mut sources = merge
            .iter()
            .map(|path| load_template(path))
            .collect::<Result<Vec<_>>>()?;
        sources.push(doc);
        doc = json!({"Fn::Merge": sources});
    }
    let mut doc = import_scripts(doc, file, session)?;
    patch_launchconf(&mut doc)?;
    Ok(doc)
}

pub fn yaml_to_json(
    file: &Path,
    merge: &[PathBuf],
    session: &mut PreprocessingSession<'_>,
) -> Result<String> {
    let doc = yaml_to_dict(file, merge, session)?;
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Same as [`yaml_to_json`] without any whitespace, for uploading.
pub fn yaml_to_json_small(
    file: &Path,
    merge: &[PathBuf],
    session: &mut PreprocessingSession<'_>,
) -> Result<String> {
    let doc = yaml_to_dict(file, merge, session)?;
    Ok(serde_json::to_string(&doc)?)
}

pub fn yaml_to_yaml(file: &Path, session: &mut PreprocessingSession<'_>) -> Result<String> {
    let doc = yaml_to_dict(file, &[], session)?;
    Ok(cfn_yaml::dump_yaml(&doc)?)
}

/// Converts CloudFormation JSON to YAML, writing embedded scripts out next
/// to the JSON file.
pub fn json_to_yaml(file: &Path) -> Result<String> {
    let text = fs::read_to_string(file).map_err(|err| Error::io(file, err))?;
    let mut doc: Value = serde_json::from_str(&text)?;
    extract_scripts(&mut doc, &file.display().to_string())?;
    Ok(cfn_yaml::dump_yaml(&doc)?)
}

/// Appends a hash of the launch configuration metadata to its user data,
/// so that metadata changes replace the instances.
pub fn patch_launchconf(doc: &mut Value) -> Result<()> {
    let Some(metadata) = launchconf_metadata(doc).cloned() else {
        return Ok(());
    };
    let mut hasher = DefaultHasher::new();
    serde_json::to_string_pretty(&metadata)?.hash(&mut hasher);
    let marker = format!("\nexit 0\n# metadata hash: {}\n", hasher.finish());
    let refs = get_refs(&metadata);

    match launchconf_userdata(doc) {
        Some(Value::Array(chunks)) => {
            chunks.push(json!(marker));
            for (i, name) in refs.iter().enumerate() {
                chunks.push(json!(if i == 0 { "# metadata params: " } else { ", " }));
                chunks.push(json!({ "Ref": name }));
            }
            if !refs.is_empty() {
                chunks.push(json!("\n"));
            }
        }
        Some(Value::String(script)) => script.push_str(&marker),
        _ => debug!("launch configuration has no patchable user data"),
    }
    Ok(())
}

fn is_launch_configuration(resource: &Value) -> bool {
    resource.get("Type").and_then(Value::as_str) == Some(LAUNCH_CONFIGURATION)
}

fn launchconf_metadata(doc: &Value) -> Option<&Value> {
    doc.get("Resources")?
        .as_object()?
        .values()
        .filter(|resource| is_launch_configuration(resource))
        .find_map(|resource| resource.get("Metadata"))
}

/// The `Fn::Join` chunks or `Fn::Sub` text of the first launch
/// configuration user data.
fn launchconf_userdata(doc: &mut Value) -> Option<&mut Value> {
    doc.get_mut("Resources")?
        .as_object_mut()?
        .values_mut()
        .filter(|resource| is_launch_configuration(resource))
        .find_map(|resource| {
            let base64 = resource.pointer_mut("/Properties/UserData/Fn::Base64")?;
            let is_join = base64
                .get("Fn::Join")
                .and_then(Value::as_array)
                .is_some_and(|join| join.len() >= 2);
            if is_join {
                base64.pointer_mut("/Fn::Join/1")
            } else {
                base64.get_mut("Fn::Sub")
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticProvider;
    use crate::session::tests::offline_options;
    use pretty_assertions::assert_eq;

    fn convert(file: &Path, merge: &[PathBuf]) -> Result<Value> {
        let provider = StaticProvider::default();
        let mut session = PreprocessingSession::new(&provider, offline_options());
        yaml_to_dict(file, merge, &mut session)
    }

    const TEMPLATE: &str = r#"Parameters:
  paramEnv:
    Type: String
    Default: dev
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    Properties:
      BucketName: !Sub "${AWS::StackName}-((paramEnv))"
Outputs:
  BucketArn:
    Value: !GetAtt Bucket.Arn
  Name:
    Value: !Ref Bucket
"#;

    #[test]
    fn test_yaml_to_dict_expands_short_forms() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("template.yaml");
        fs::write(&file, TEMPLATE).unwrap();

        let doc = convert(&file, &[]).unwrap();
        assert_eq!(
            doc["Resources"]["Bucket"]["Properties"]["BucketName"],
            json!({"Fn::Sub": "${AWS::StackName}-dev"})
        );
        assert_eq!(doc["Outputs"]["BucketArn"]["Value"], json!({"Fn::GetAtt": ["Bucket", "Arn"]}));
        assert_eq!(doc["Outputs"]["Name"]["Value"], json!({"Ref": "Bucket"}));
    }

    #[test]
    fn test_yaml_to_json_forms() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("template.yaml");
        fs::write(&file, "Outputs:\n  A:\n    Value: x\n").unwrap();
        let provider = StaticProvider::default();
        let mut session = PreprocessingSession::new(&provider, offline_options());

        let pretty = yaml_to_json(&file, &[], &mut session).unwrap();
        assert_eq!(pretty, "{\n  \"Outputs\": {\n    \"A\": {\n      \"Value\": \"x\"\n    }\n  }\n}");
        let small = yaml_to_json_small(&file, &[], &mut session).unwrap();
        assert_eq!(small, r#"{"Outputs":{"A":{"Value":"x"}}}"#);
    }

    #[test]
    fn test_merge_files_go_first() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        fs::write(&base, "Parameters:\n  paramA:\n    Default: a\nOutputs:\n  A:\n    Value: base\n").unwrap();
        let file = dir.path().join("template.yaml");
        fs::write(&file, "Outputs:\n  A:\n    Value: ((paramA))\n  B:\n    Value: b\n").unwrap();

        let doc = convert(&file, &[base]).unwrap();
        assert_eq!(
            doc,
            json!({
                "Parameters": {"paramA": {"Default": "a"}},
                "Outputs": {"A": {"Value": "a"}, "B": {"Value": "b"}}
            })
        );
    }

    #[test]
    fn test_missing_template_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = convert(&dir.path().join("nope.yaml"), &[]).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        fs::write(&file, "Value: !Bogus x\n").unwrap();
        let err = convert(&file, &[]).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    fn launch_config(user_data: Value) -> Value {
        json!({
            "Resources": {
                "LC": {
                    "Type": "AWS::AutoScaling::LaunchConfiguration",
                    "Metadata": {"AWS::CloudFormation::Init": {"config": {"files": {
                        "/etc/app.conf": {"content": {"Fn::Join": ["", ["bucket=", {"Ref": "Bucket"}]]}}
                    }}}},
                    "Properties": {"UserData": {"Fn::Base64": user_data}}
                }
            }
        })
    }

    #[test]
    fn test_patch_launchconf_join() {
        let mut doc = launch_config(json!({"Fn::Join": ["", ["#!/bin/bash\n"]]}));
        patch_launchconf(&mut doc).unwrap();

        let chunks = doc["Resources"]["LC"]["Properties"]["UserData"]["Fn::Base64"]["Fn::Join"][1]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(chunks.len(), 5);
        assert!(chunks[1]
            .as_str()
            .unwrap()
            .starts_with("\nexit 0\n# metadata hash: "));
        assert_eq!(chunks[2], json!("# metadata params: "));
        assert_eq!(chunks[3], json!({"Ref": "Bucket"}));
        assert_eq!(chunks[4], json!("\n"));
    }

    #[test]
    fn test_patch_launchconf_sub_is_stable() {
        let mut first = launch_config(json!({"Fn::Sub": "#!/bin/bash\n"}));
        let mut second = first.clone();
        patch_launchconf(&mut first).unwrap();
        patch_launchconf(&mut second).unwrap();

        let script = first["Resources"]["LC"]["Properties"]["UserData"]["Fn::Base64"]["Fn::Sub"]
            .as_str()
            .unwrap();
        assert!(script.starts_with("#!/bin/bash\n\nexit 0\n# metadata hash: "));
        assert_eq!(first, second);
    }

    #[test]
    fn test_patch_without_metadata_is_noop() {
        let mut doc = json!({"Resources": {"LC": {
            "Type": "AWS::AutoScaling::LaunchConfiguration",
            "Properties": {"UserData": {"Fn::Base64": {"Fn::Sub": "x"}}}
        }}});
        let before = doc.clone();
        patch_launchconf(&mut doc).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn test_json_to_yaml_extracts_user_data() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stack.json");
        fs::write(
            &file,
            r##"{"Resources": {"LC": {"Properties": {"UserData": {"Fn::Base64": {"Fn::Join": ["", ["#!/bin/bash\n", "echo hi\n"]]}}}}}}"##,
        )
        .unwrap();

        let yaml = json_to_yaml(&file).unwrap();
        let script = format!("{}-userdata.sh", file.display());
        assert!(yaml.contains("Fn::ImportFile"));
        assert_eq!(fs::read_to_string(&script).unwrap(), "#!/bin/bash\necho hi\n\n\n");

        let doc = cfn_yaml::parse_yaml_to_json(&yaml).unwrap();
        assert_eq!(
            doc["Resources"]["LC"]["Properties"]["UserData"]["Fn::Base64"],
            json!({"Fn::ImportFile": script})
        );
    }
}
