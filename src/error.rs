use std::path::PathBuf;

use crate::cfn_yaml;
use crate::provider::LookupError;
use crate::session::Diagnostic;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: cfn_yaml::errors::Error,
    },

    #[error("Failed to run {command}: {message}")]
    Command { command: String, message: String },

    #[error("Failed to serialize document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to serialize document: {0}")]
    Yaml(#[from] cfn_yaml::errors::Error),

    #[error("{path}: Fn::Merge must associate to a list in file {file}")]
    MalformedMerge { path: String, file: String },

    #[error("{path}: StackRef requires string region, stackName and paramName in file {file}")]
    MalformedStackRef { path: String, file: String },

    #[error("Did not find value for: {param} in stack {stack}")]
    UnknownStackParameter { param: String, stack: String },

    #[error("Include {0} not found")]
    IncludeNotFound(String),

    #[error("Failed to convert reference inside script: {0}")]
    InvalidScriptReference(String),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("{} error(s) while preprocessing template", .0.len())]
    Aggregated(Vec<Diagnostic>),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, source: cfn_yaml::errors::Error) -> Self {
        Error::Parse {
            path: path.into(),
            source,
        }
    }

    /// Deferred diagnostics collected during the run, empty for fatal errors.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::Aggregated(diagnostics) => diagnostics,
            _ => &[],
        }
    }
}
