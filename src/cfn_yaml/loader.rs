// Copyright 2020-2022 Amazon Web Services, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Loader adapted from AWS CloudFormation Guard: walks the YAML tree and turns
// short-form intrinsic tags into their long JSON form.

use serde_json::{Map, Number, Value};
use serde_yml::value::TaggedValue;

use super::errors::{Error, InternalError, Result};
use super::mappings::{short_form_to_long, DOTTED_SCALAR_FUNC_REF};

const MERGE_KEY: &str = "<<";

pub(crate) struct Loader {
    path: Vec<String>,
}

impl Loader {
    pub(crate) fn new() -> Self {
        Loader { path: Vec::new() }
    }

    pub(crate) fn load(&mut self, content: String) -> Result<Value> {
        let yaml: serde_yml::Value = serde_yml::from_str(&content)?;
        self.convert(&yaml)
    }

    fn location(&self) -> String {
        if self.path.is_empty() {
            "document root".to_string()
        } else {
            self.path.join(".")
        }
    }

    fn convert(&mut self, yaml: &serde_yml::Value) -> Result<Value> {
        match yaml {
            serde_yml::Value::Null => Ok(Value::Null),
            serde_yml::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_yml::Value::Number(n) => convert_number(n).map(Value::Number),
            serde_yml::Value::String(s) => Ok(Value::String(s.clone())),
            serde_yml::Value::Sequence(seq) => {
                let mut list = Vec::with_capacity(seq.len());
                for (idx, item) in seq.iter().enumerate() {
                    self.path.push(idx.to_string());
                    let converted = self.convert(item);
                    self.path.pop();
                    list.push(converted?);
                }
                Ok(Value::Array(list))
            }
            serde_yml::Value::Mapping(mapping) => self.convert_mapping(mapping),
            serde_yml::Value::Tagged(tagged) => self.convert_tagged(tagged),
        }
    }

    fn convert_mapping(&mut self, mapping: &serde_yml::Mapping) -> Result<Value> {
        let mut merged = Map::new();
        let mut explicit = Map::new();
        for (key, value) in mapping.iter() {
            let key = self.mapping_key(key)?;
            self.path.push(key.clone());
            let converted = self.convert(value);
            self.path.pop();
            let converted = converted?;
            if key == MERGE_KEY {
                self.flatten_merge(converted, &mut merged)?;
            } else {
                explicit.insert(key, converted);
            }
        }
        for (key, value) in explicit {
            merged.insert(key, value);
        }
        Ok(Value::Object(merged))
    }

    /// YAML merge keys: earlier sources win over later ones, explicit keys win over all.
    fn flatten_merge(&self, source: Value, into: &mut Map<String, Value>) -> Result<()> {
        match source {
            Value::Object(map) => {
                for (key, value) in map {
                    into.entry(key).or_insert(value);
                }
                Ok(())
            }
            Value::Array(list) => {
                for item in list {
                    self.flatten_merge(item, into)?;
                }
                Ok(())
            }
            other => Err(Error::ParseError(format!(
                "merge key at {} must refer to a mapping, found {}",
                self.location(),
                other
            ))),
        }
    }

    fn mapping_key(&self, key: &serde_yml::Value) -> Result<String> {
        match key {
            serde_yml::Value::String(s) => Ok(s.clone()),
            serde_yml::Value::Bool(b) => Ok(b.to_string()),
            serde_yml::Value::Number(n) => Ok(n.to_string()),
            serde_yml::Value::Null => Ok("null".to_string()),
            other => Err(InternalError::InvalidKeyType(format!(
                "{:?} at {}",
                other,
                self.location()
            ))
            .into()),
        }
    }

    fn convert_tagged(&mut self, tagged: &TaggedValue) -> Result<Value> {
        let tag = tagged.tag.to_string();
        let short = tag.trim_start_matches('!');
        let long = short_form_to_long(short).ok_or_else(|| Error::UnknownTag(short.to_string()))?;
        self.path.push(long.to_string());
        let inner = self.convert(&tagged.value);
        self.path.pop();
        let inner = match inner? {
            Value::String(s) if DOTTED_SCALAR_FUNC_REF.contains(short) => match s.split_once('.') {
                Some((resource, attribute)) => Value::Array(vec![
                    Value::String(resource.to_string()),
                    Value::String(attribute.to_string()),
                ]),
                None => Value::String(s),
            },
            other => other,
        };
        let mut map = Map::new();
        map.insert(long.to_string(), inner);
        Ok(Value::Object(map))
    }
}

fn convert_number(n: &serde_yml::Number) -> Result<Number> {
    if let Some(i) = n.as_i64() {
        Ok(Number::from(i))
    } else if let Some(u) = n.as_u64() {
        Ok(Number::from(u))
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .ok_or_else(|| InternalError::InvalidNumber(n.to_string()).into())
    }
}
