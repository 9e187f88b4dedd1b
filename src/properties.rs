//! Property-file Loader: reads the `infra*.properties` cascade that feeds the
//! sourced parameters of a template.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::expand::expand_text;
use crate::params::ParameterStore;
use crate::provider::CloudProvider;

pub type Properties = IndexMap<String, String>;

/// Which component and sub-components to load properties for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterQuery {
    pub component: Option<String>,
    pub stack: Option<String>,
    pub serverless: Option<String>,
    pub docker: Option<String>,
    pub image: Option<String>,
    pub branch: Option<String>,
}

impl ParameterQuery {
    /// Component and stack derived from a template at
    /// `<component>/stack-<name>/<template>`.
    pub fn for_template(template: &Path) -> Self {
        let absolute = fs::canonicalize(template).unwrap_or_else(|_| template.to_path_buf());
        let template_dir = absolute.parent();
        let stack = template_dir
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().trim_start_matches("stack-").to_string());
        let component = template_dir
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().to_string());
        ParameterQuery {
            component,
            stack,
            ..Default::default()
        }
    }
}

pub struct PropertyLoader<'a> {
    root: PathBuf,
    env: Properties,
    provider: &'a dyn CloudProvider,
}

impl<'a> PropertyLoader<'a> {
    pub fn new(root: impl Into<PathBuf>, provider: &'a dyn CloudProvider) -> Self {
        PropertyLoader {
            root: root.into(),
            env: std::env::vars().collect(),
            provider,
        }
    }

    pub fn with_env(mut self, env: Properties) -> Self {
        self.env = env;
        self
    }

    /// Loads and merges the property files for `query`, later files
    /// overriding earlier ones.
    pub fn load_parameters(&self, query: &ParameterQuery) -> Result<Properties> {
        let branch = match &query.branch {
            Some(branch) => branch.clone(),
            None => match self.env.get("GIT_BRANCH") {
                Some(branch) => branch.clone(),
                None => self.current_branch()?,
            },
        };
        let branch = branch.trim().rsplit('/').next().unwrap_or_default().to_string();

        let mut ret = Properties::new();
        ret.insert("GIT_BRANCH".to_string(), branch.clone());
        if let Some(account) = self.provider.account_id() {
            ret.insert("ACCOUNT_ID".to_string(), account);
        }

        let mut env = self.env.clone();
        let mut files = vec![
            PathBuf::from("infra.properties"),
            PathBuf::from(format!("infra-{}.properties", branch)),
        ];
        if let Some(component) = &query.component {
            ret.insert("COMPONENT".to_string(), component.clone());
            let component_dir = PathBuf::from(component);
            files.push(component_dir.join("infra.properties"));
            files.push(component_dir.join(format!("infra-{}.properties", branch)));
            for (kind, name) in [
                ("stack", &query.stack),
                ("serverless", &query.serverless),
                ("docker", &query.docker),
                ("image", &query.image),
            ] {
                if let Some(name) = name {
                    env.insert(format!("ORIG_{}_NAME", kind.to_uppercase()), name.clone());
                    let sub_dir = component_dir.join(format!("{}-{}", kind, name));
                    files.push(sub_dir.join("infra.properties"));
                    files.push(sub_dir.join(format!("infra-{}.properties", branch)));
                }
            }
            files.push(component_dir.join("image").join("infra.properties"));
            files.push(
                component_dir
                    .join("image")
                    .join(format!("infra-{}.properties", branch)),
            );
        }

        for file in files {
            let path = self.root.join(file);
            if path.is_file() {
                debug!(file = %path.display(), "importing properties");
                import_parameter_file(&path, &env, &mut ret)?;
            }
        }

        if !ret.contains_key("REGION") {
            if let Some(region) = self.provider.region() {
                ret.insert("REGION".to_string(), region);
            }
        }
        let env_id = ret
            .entry("paramEnvId".to_string())
            .or_insert_with(|| branch.clone())
            .clone();
        let component = query.component.clone().unwrap_or_default();
        if let Some(orig) = env.get("ORIG_STACK_NAME") {
            ret.insert("ORIG_STACK_NAME".to_string(), orig.clone());
            ret.entry("STACK_NAME".to_string())
                .or_insert_with(|| format!("{}-{}-{}", component, orig, env_id));
        }
        if let Some(orig) = env.get("ORIG_DOCKER_NAME") {
            ret.insert("ORIG_DOCKER_NAME".to_string(), orig.clone());
            ret.entry("DOCKER_NAME".to_string())
                .or_insert_with(|| format!("{}/{}-{}", component, env_id, orig));
        }
        for orig_key in ["ORIG_SERVERLESS_NAME", "ORIG_IMAGE_NAME"] {
            if let Some(orig) = env.get(orig_key) {
                ret.insert(orig_key.to_string(), orig.clone());
            }
        }
        ret.entry("JENKINS_JOB_PREFIX".to_string())
            .or_insert_with(|| format!("aws{}", env_id));
        Ok(ret)
    }

    /// Property files merged with the environment, which wins.
    pub fn sourced_parameters(&self, template: &Path) -> Result<Properties> {
        let mut sourced = self.load_parameters(&ParameterQuery::for_template(template))?;
        for (key, value) in &self.env {
            sourced.insert(key.clone(), value.clone());
        }
        Ok(sourced)
    }

    fn current_branch(&self) -> Result<String> {
        let command = "git rev-parse --abbrev-ref HEAD";
        let output = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&self.root)
            .output()
            .map_err(|err| Error::Command {
                command: command.to_string(),
                message: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Command {
                command: command.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Reads one properties file into `params`.
///
/// Values are expanded against `env` and the values loaded so far. An
/// environment variable with the same key replaces the file value.
pub fn import_parameter_file(path: &Path, env: &Properties, params: &mut Properties) -> Result<()> {
    let content = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
    let mut used: ParameterStore = env
        .iter()
        .chain(params.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut pending = String::new();
    for line in content.lines() {
        if line.starts_with('#') {
            pending.clear();
            continue;
        }
        if let Some(continued) = line.strip_suffix('\\') {
            pending.push_str(continued);
            continue;
        }
        pending.push_str(line);
        let full = std::mem::take(&mut pending);
        process_line(&full, env, params, &mut used);
    }
    if !pending.is_empty() {
        process_line(&pending, env, params, &mut used);
    }
    Ok(())
}

fn process_line(line: &str, env: &Properties, params: &mut Properties, used: &mut ParameterStore) {
    let Some((key, value)) = line.split_once('=') else {
        return;
    };
    let key: String = key
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if key.is_empty() {
        return;
    }
    let value = match env.get(&key) {
        Some(from_env) => from_env.clone(),
        None => value.trim().to_string(),
    };
    let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(unquoted) => unquoted.to_string(),
        None => value,
    };
    let value = expand_text(&value, used);
    used.insert(key.clone(), value.clone());
    params.insert(key, value);
}
