//! Preprocessor for nitor-deploy-tools CloudFormation templates.
//!
//! Templates are YAML (or JSON) documents extended with `Fn::ImportFile`,
//! `Fn::ImportYaml`, `Fn::Merge` and `StackRef` macros and with `${NAME}` /
//! `((NAME))` parameter references. [`template::yaml_to_json`] expands them
//! into plain CloudFormation.

pub mod aws;
pub mod cfn_yaml;
pub mod error;
pub mod expand;
pub mod includes;
pub mod params;
pub mod preprocess;
pub mod properties;
pub mod provider;
pub mod reference_checker;
pub mod script;
pub mod session;
pub mod template;

pub use error::{Error, Result};
pub use params::{ParamValue, ParameterStore};
pub use preprocess::import_scripts;
pub use session::{Diagnostic, PreprocessingSession, SessionOptions};
