//! Script import and export.
//!
//! Importing turns a shell (or JS, PowerShell) script into `Fn::Join`
//! arguments, replacing `CF_<NAME>` declarations and `#CF`/`//CF`
//! annotations with `Ref` nodes. Exporting writes such a join back out as
//! a script file with a `CF_<NAME>=""` declaration block.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::cfn_yaml;
use crate::error::{Error, Result};
use crate::expand::text_of;
use crate::reference_checker::{DEFAULT_KEY, OPTIONAL_KEY, SOURCE_KEY};

const CFG_PREFIX: &str = "AWS::CloudFormation::Init_config_files_";

lazy_static! {
    // `var`/`const` prefixes let javascript declare parameters too
    static ref VAR_DECL: Regex = Regex::new(
        r#"^((\s*var\s+)|(\s*const\s+))?CF_([^\s=]+)[\s="']*([^#"'`]*)(?:["'\s`]*)(#optional)?"#
    )
    .unwrap();
    static ref EMBED_DECL: Regex =
        Regex::new(r#"^(.*?=\s*)?(.*?)(?:(?:`?#|//)CF([^#`]*))["`\s]*(#optional)?"#).unwrap();
}

pub fn decode_parameter_name(name: &str) -> String {
    name.replace("__", "::")
}

pub fn bash_encode_parameter_name(name: &str) -> String {
    format!("CF_{}", name.replace("::", "__"))
}

/// Reads a script and returns it as `Fn::Join` arguments: literal strings
/// interleaved with `Ref` nodes carrying the script as provenance.
pub fn import_script(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    let filename = path.display().to_string();
    let line_end = if filename.ends_with(".ps1") { "'\r\n" } else { "'\n" };

    let mut parts = Vec::new();
    for line in content.replace("\r\n", "\n").split_inclusive('\n') {
        if let Some(caps) = VAR_DECL.captures(line) {
            let name = &caps[4];
            let mut reference = Map::new();
            reference.insert("Ref".to_string(), json!(decode_parameter_name(name)));
            reference.insert(SOURCE_KEY.to_string(), json!(filename));
            if caps.get(6).is_some() {
                let default = caps.get(5).map_or("", |m| m.as_str());
                reference.insert(OPTIONAL_KEY.to_string(), json!("true"));
                reference.insert(
                    DEFAULT_KEY.to_string(),
                    json!(default.trim_matches(|c| c == ' ' || c == '"' || c == '\'')),
                );
            }
            let name_end = caps.get(4).map_or(0, |m| m.end());
            parts.push(json!(format!("{}='", &line[..name_end])));
            parts.push(Value::Object(reference));
            parts.push(json!(if caps.get(1).is_some() { "';\n" } else { "'\n" }));
        } else if let Some(caps) = EMBED_DECL.captures(line) {
            let (prefix, default) = match caps.get(1) {
                Some(prefix) => (
                    prefix.as_str(),
                    caps.get(2)
                        .map_or("", |m| m.as_str())
                        .trim_matches(|c| c == ' ' || c == '"' || c == '\''),
                ),
                None => (caps.get(2).map_or("", |m| m.as_str()), ""),
            };
            parts.push(json!(format!("{}'", prefix)));

            let listing = format!("[{}]", &caps[3]);
            let entries = cfn_yaml::parse_yaml_to_json(&listing)
                .map_err(|err| Error::parse(path, err))?;
            let optional = caps.get(4).is_some();
            if let Value::Array(entries) = entries {
                for mut entry in entries {
                    apply_source(&mut entry, &filename, optional, default);
                    parts.push(entry);
                }
            }
            parts.push(json!(line_end));
        } else {
            parts.push(json!(line));
        }
    }
    Ok(parts)
}

/// Marks every `Ref` below `value` as coming from `filename`.
pub fn apply_source(value: &mut Value, filename: &str, optional: bool, default: &str) {
    match value {
        Value::Object(map) => {
            if map.contains_key("Ref") {
                map.insert(SOURCE_KEY.to_string(), json!(filename));
                if optional {
                    map.insert(OPTIONAL_KEY.to_string(), json!("true"));
                    map.insert(DEFAULT_KEY.to_string(), json!(default));
                }
            }
            for (key, val) in map.iter_mut() {
                if key != SOURCE_KEY && key != OPTIONAL_KEY && key != DEFAULT_KEY {
                    apply_source(val, filename, optional, default);
                }
            }
        }
        Value::Array(list) => {
            for item in list {
                apply_source(item, filename, optional, default);
            }
        }
        _ => {}
    }
}

/// File name an extracted script is written to.
pub fn encode_script_filename(prefix: &str, path: &str) -> String {
    if path.contains("UserData_Fn::Base64") {
        return format!("{}-userdata.sh", prefix);
    }
    if let Some(idx) = path.find(CFG_PREFIX) {
        let start = idx + CFG_PREFIX.len();
        let end = path[start..]
            .find("_content_")
            .map_or(path.len(), |offset| start + offset);
        let cfg_path = &path[start..end];
        let basename = cfg_path.rsplit('/').next().unwrap_or(cfg_path);
        return format!("{}-{}", prefix, basename);
    }
    format!("{}-{}", prefix, path)
}

/// Writes the `Fn::Join` arguments found at `path` out as a script.
///
/// Literal chunks up to the first `Ref` come first, then one
/// `CF_<NAME>="";` declaration per distinct reference, then the rest of the
/// script with every `Ref` written as `${CF_<NAME>}`.
///
/// # Arguments
/// * `prefix` - Name of the converted template; output files start with it
/// * `path` - Underscore-joined location of the join in the template
/// * `join_args` - The chunks of the `Fn::Join`
///
/// # Returns
/// The name of the written file
pub fn extract_script(prefix: &str, path: &str, join_args: &[Value]) -> Result<String> {
    let mut before = String::new();
    let mut after = String::new();
    let mut declarations: IndexMap<String, String> = IndexMap::new();
    let mut seen_ref = false;

    for element in join_args {
        let chunk = match element {
            Value::Object(map) => match map.get("Ref") {
                Some(Value::String(name)) if !name.is_empty() => {
                    let bash_name = bash_encode_parameter_name(name);
                    declarations
                        .entry(name.clone())
                        .or_insert_with(|| format!("{}=\"\";\n", bash_name));
                    if !seen_ref {
                        seen_ref = true;
                        // the declarations go after the last complete line
                        let split = before.rfind('\n').map_or(0, |idx| idx + 1);
                        after = before.split_off(split);
                    }
                    after.push_str(&format!("${{{}}}", bash_name));
                    continue;
                }
                Some(_) => {
                    return Err(Error::InvalidScriptReference(element.to_string()));
                }
                None => {
                    warn!(path, "Dict with no ref in script: {}", element);
                    continue;
                }
            },
            other => text_of(other).unwrap_or_default(),
        };
        if seen_ref {
            after.push_str(&chunk);
        } else {
            before.push_str(&chunk);
        }
    }

    let filename = encode_script_filename(prefix, path);
    info!("{}: Exported path '{}' contents to file '{}'", prefix, path, filename);

    let mut script = before;
    script.push('\n');
    for declaration in declarations.values() {
        script.push_str(declaration);
    }
    script.push('\n');
    script.push_str(&after);
    fs::write(&filename, script).map_err(|err| Error::io(&filename, err))?;
    Ok(filename)
}

/// Replaces every script-like `Fn::Join` in the document by an
/// `Fn::ImportFile` of the extracted file.
pub fn extract_scripts(value: &mut Value, prefix: &str) -> Result<()> {
    extract_at(value, prefix, "")
}

fn extract_at(value: &mut Value, prefix: &str, path: &str) -> Result<()> {
    let Value::Object(map) = value else {
        return Ok(());
    };
    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        if let Some(child) = map.get_mut(&key) {
            extract_at(child, prefix, &format!("{}{}_", path, key))?;
        }
        if key != "Fn::Join" {
            continue;
        }
        let Some(args) = map.get(&key).and_then(script_join_args) else {
            continue;
        };
        let filename = extract_script(prefix, path, args)?;
        map.shift_remove(&key);
        map.insert("Fn::ImportFile".to_string(), json!(filename));
    }
    Ok(())
}

/// The chunks of a `Fn::Join` that looks like an embedded script.
fn script_join_args(join: &Value) -> Option<&[Value]> {
    let [separator, chunks] = join.as_array()?.as_slice() else {
        return None;
    };
    if separator.as_str() != Some("") {
        return None;
    }
    let chunks = chunks.as_array()?;
    match chunks.first()? {
        Value::String(first) if !first.starts_with("#!") => None,
        _ => Some(chunks.as_slice()),
    }
}
