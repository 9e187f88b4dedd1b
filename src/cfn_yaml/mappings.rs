// Copyright 2020-2022 Amazon Web Services, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
//
// CloudFormation intrinsic function tag mappings from AWS CloudFormation Guard

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

lazy_static! {
    pub(crate) static ref SHORT_FORM_TO_LONG_MAPPING: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("Ref", "Ref");
        m.insert("Condition", "Condition");
        m.insert("Base64", "Fn::Base64");
        m.insert("Cidr", "Fn::Cidr");
        m.insert("FindInMap", "Fn::FindInMap");
        m.insert("GetAtt", "Fn::GetAtt");
        m.insert("GetAZs", "Fn::GetAZs");
        m.insert("ImportValue", "Fn::ImportValue");
        m.insert("Join", "Fn::Join");
        m.insert("Select", "Fn::Select");
        m.insert("Split", "Fn::Split");
        m.insert("Sub", "Fn::Sub");
        m.insert("Transform", "Fn::Transform");
        m.insert("And", "Fn::And");
        m.insert("Equals", "Fn::Equals");
        m.insert("If", "Fn::If");
        m.insert("Not", "Fn::Not");
        m.insert("Or", "Fn::Or");
        // preprocessor extensions
        m.insert("ImportFile", "Fn::ImportFile");
        m.insert("ImportYaml", "Fn::ImportYaml");
        m.insert("Merge", "Fn::Merge");
        m
    };
    /// Tags whose scalar form is a dotted `Resource.Attribute` pair.
    pub(crate) static ref DOTTED_SCALAR_FUNC_REF: HashSet<&'static str> = {
        let mut set = HashSet::new();
        set.insert("GetAtt");
        set
    };
}

pub(crate) fn short_form_to_long(fn_ref: &str) -> Option<&'static str> {
    SHORT_FORM_TO_LONG_MAPPING.get(fn_ref).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsics_map_to_fn_namespace() {
        assert_eq!(short_form_to_long("Sub"), Some("Fn::Sub"));
        assert_eq!(short_form_to_long("GetAZs"), Some("Fn::GetAZs"));
    }

    #[test]
    fn test_ref_and_condition_keep_their_name() {
        assert_eq!(short_form_to_long("Ref"), Some("Ref"));
        assert_eq!(short_form_to_long("Condition"), Some("Condition"));
    }

    #[test]
    fn test_preprocessor_extensions() {
        assert_eq!(short_form_to_long("Merge"), Some("Fn::Merge"));
        assert_eq!(short_form_to_long("ImportYaml"), Some("Fn::ImportYaml"));
        assert_eq!(short_form_to_long("ImportFile"), Some("Fn::ImportFile"));
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(short_form_to_long("RefAll"), None);
    }
}
