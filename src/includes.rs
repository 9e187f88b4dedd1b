//! Include Resolver: locates files referenced by `Fn::ImportFile` and
//! `Fn::ImportYaml`.

use std::env;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

pub const INCLUDE_PATH_ENV: &str = "CF_TEMPLATE_INCLUDE";

lazy_static! {
    static ref AWS_UTILS_PREFIX: Regex = Regex::new(r"^(\.\./\.\./|\.\./|\./)?aws-utils/").unwrap();
    static ref INCLUDES_PREFIX: Regex = Regex::new(r"^\(\(\s?includes\s?\)\)/").unwrap();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncludeResolver {
    dirs: Vec<PathBuf>,
}

impl IncludeResolver {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        IncludeResolver { dirs }
    }

    /// `CF_TEMPLATE_INCLUDE` entries followed by the `includes` directory
    /// shipped next to the executable.
    pub fn from_env() -> Self {
        let configured = env::var(INCLUDE_PATH_ENV).ok();
        Self::from_path_list(configured.as_deref())
    }

    pub fn from_path_list(path_list: Option<&str>) -> Self {
        let mut dirs: Vec<PathBuf> = path_list
            .into_iter()
            .flat_map(|list| list.split(':'))
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .collect();
        if let Some(bundled) = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("includes")))
        {
            dirs.push(bundled);
        }
        IncludeResolver { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// The name itself when it is an existing file, else the first include
    /// directory that has it.
    pub fn find_include(&self, name: &str) -> Option<PathBuf> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }
        self.dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// Resolves a file referenced from `basefile`.
    pub fn resolve_file(&self, name: &str, basefile: &Path) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        if name.starts_with('/') {
            return existing(PathBuf::from(name));
        }
        for prefix in [&*AWS_UTILS_PREFIX, &*INCLUDES_PREFIX] {
            if prefix.is_match(name) {
                let stripped = prefix.replace(name, "");
                return self.find_include(&stripped).and_then(existing);
            }
        }
        let base = match basefile.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        existing(base.join(name))
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        Some(path)
    } else {
        None
    }
}
