// Copyright 2020-2022 Amazon Web Services, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// This module contains code adapted from AWS CloudFormation Guard
// https://github.com/aws-cloudformation/cloudformation-guard

pub mod errors;
pub(crate) mod loader;
mod mappings;

use errors::Result;
use serde_json::Value;

/// Parse CloudFormation YAML (or JSON) with intrinsic function tag support
pub fn parse_yaml_to_json(yaml_str: &str) -> Result<Value> {
    let mut loader = loader::Loader::new();
    loader.load(yaml_str.to_string())
}

/// Serialize a document as block-style YAML
pub fn dump_yaml(value: &Value) -> Result<String> {
    Ok(serde_yml::to_string(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dump_then_parse_keeps_document() {
        let doc = json!({
            "Parameters": {"paramFoo": {"Type": "String", "Default": "bar"}},
            "Resources": {"Bucket": {"Type": "AWS::S3::Bucket"}}
        });
        let text = dump_yaml(&doc).unwrap();
        assert!(text.contains("paramFoo:"));
        assert_eq!(parse_yaml_to_json(&text).unwrap(), doc);
    }
}
