//! State of one preprocessing run: accumulated diagnostics, the StackRef
//! cache and the Parameter Store derived from the document being expanded.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::includes::IncludeResolver;
use crate::params::{BaseParams, ParameterStore};
use crate::properties::{Properties, PropertyLoader};
use crate::provider::{stack_key, CloudProvider, LookupError, StackValues};

/// Top level sections the Parameter Store is built from.
const PARAM_SECTIONS: [&str; 3] = ["Parameters", "Resources", "resources"];

/// A deferred error, reported once the whole document has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR: {}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    /// Below an entry popped off an `Fn::Merge` source list.
    Detached,
}

/// Structural position of a node in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath {
    segments: Vec<Segment>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, key: &str) -> Self {
        self.with(Segment::Key(key.to_string()))
    }

    pub fn index(&self, index: usize) -> Self {
        self.with(Segment::Index(index))
    }

    pub fn detached(&self) -> Self {
        self.with(Segment::Detached)
    }

    fn with(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        NodePath { segments }
    }

    /// JSON pointer of the node, `None` when it is not part of the tree.
    pub fn pointer(&self) -> Option<String> {
        let mut pointer = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => {
                    pointer.push('/');
                    pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
                }
                Segment::Index(index) => {
                    pointer.push('/');
                    pointer.push_str(&index.to_string());
                }
                Segment::Detached => return None,
            }
        }
        Some(pointer)
    }

    fn affects_params(&self) -> bool {
        match self.segments.first() {
            None => true,
            Some(Segment::Key(key)) => PARAM_SECTIONS.contains(&key.as_str()),
            Some(_) => false,
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => write!(f, "{}_", key)?,
                Segment::Index(index) => write!(f, "{}_", index)?,
                Segment::Detached => write!(f, "/")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub includes: IncludeResolver,
    /// Directory the `infra*.properties` cascade is read from.
    pub project_root: PathBuf,
    /// Use these instead of loading property files and the environment.
    pub sourced: Option<Properties>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            includes: IncludeResolver::from_env(),
            project_root: PathBuf::from("."),
            sourced: None,
        }
    }
}

pub struct PreprocessingSession<'p> {
    provider: &'p dyn CloudProvider,
    options: SessionOptions,
    diagnostics: Vec<Diagnostic>,
    stacks: HashMap<String, StackValues>,
    base: Option<BaseParams>,
    root: Value,
    params: Rc<ParameterStore>,
    dirty: bool,
}

impl<'p> PreprocessingSession<'p> {
    pub fn new(provider: &'p dyn CloudProvider, options: SessionOptions) -> Self {
        PreprocessingSession {
            provider,
            options,
            diagnostics: Vec::new(),
            stacks: HashMap::new(),
            base: None,
            root: Value::Null,
            params: Rc::new(ParameterStore::new()),
            dirty: true,
        }
    }

    pub fn includes(&self) -> &IncludeResolver {
        &self.options.includes
    }

    /// Starts a run over `root`. Diagnostics of earlier runs are dropped;
    /// the sourced snapshot and the StackRef cache are kept.
    pub(crate) fn begin(&mut self, root: &Value, template: &Path) -> Result<()> {
        self.diagnostics.clear();
        if self.base.is_none() {
            let sourced = match &self.options.sourced {
                Some(sourced) => sourced.clone(),
                None => PropertyLoader::new(&self.options.project_root, self.provider)
                    .sourced_parameters(template)?,
            };
            self.base = Some(BaseParams {
                region: self.provider.region(),
                account_id: self.provider.account_id(),
                sourced,
            });
        }
        self.reset_root(root);
        Ok(())
    }

    pub(crate) fn reset_root(&mut self, root: &Value) {
        self.root = root.clone();
        self.dirty = true;
    }

    /// Mirrors a rewritten node into the document the Parameter Store is
    /// built from.
    pub(crate) fn commit(&mut self, path: &NodePath, node: &Value) {
        if !path.affects_params() {
            return;
        }
        let Some((last, parent)) = path.segments.split_last() else {
            self.reset_root(node);
            return;
        };
        let parent = NodePath {
            segments: parent.to_vec(),
        };
        let Some(slot) = parent
            .pointer()
            .and_then(|pointer| self.root.pointer_mut(&pointer))
        else {
            return;
        };
        match (slot, last) {
            (Value::Object(map), Segment::Key(key)) => {
                map.insert(key.clone(), node.clone());
            }
            (Value::Array(list), Segment::Index(index)) if *index < list.len() => {
                list[*index] = node.clone();
            }
            (Value::Array(list), Segment::Index(index)) if *index == list.len() => {
                list.push(node.clone());
            }
            _ => return,
        }
        self.dirty = true;
    }

    pub(crate) fn extend_diagnostics(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    /// The Parameter Store for the document as it currently stands.
    pub fn params(&mut self) -> Rc<ParameterStore> {
        if self.dirty {
            let base = self.base.clone().unwrap_or_default();
            self.params = Rc::new(ParameterStore::from_template(&self.root, &base));
            self.dirty = false;
        }
        Rc::clone(&self.params)
    }

    pub fn error(&mut self, path: impl ToString, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            path: path.to_string(),
            message: message.into(),
        };
        debug!(%diagnostic, "deferred error");
        self.diagnostics.push(diagnostic);
    }

    pub fn had_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    pub(crate) fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Parameters and outputs of a deployed stack, looked up once per session.
    pub(crate) fn stack_values(
        &mut self,
        region: &str,
        stack_name: &str,
    ) -> std::result::Result<&StackValues, LookupError> {
        let key = stack_key(region, stack_name);
        if !self.stacks.contains_key(&key) {
            let values = self.provider.stack_params_and_outputs(region, stack_name)?;
            self.stacks.insert(key.clone(), values);
        }
        Ok(&self.stacks[&key])
    }
}
