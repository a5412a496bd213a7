//! Include preprocessor
//!
//! A vspec file is a YAML mapping of `fqn -> payload`. Lines of the form
//!
//! ```text
//! #include <file> [prefix]
//! ```
//!
//! pull in another file, optionally prefixing all its keys. To YAML these
//! are comments, so the preprocessor scans the raw text for them. Includes
//! are searched in the including file's directory first, then in the user
//! include directories.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

const INCLUDE_DIRECTIVE: &str = "#include";

#[derive(Debug, Error)]
pub enum IncludeError {
    #[error("malformed include statement: '{0}'")]
    MalformedStatement(String),

    #[error("unable to find include '{target}', searched: {}", .searched.join(", "))]
    NotFound {
        target: String,
        searched: Vec<String>,
    },

    #[error("duplicated key: '{key}'")]
    DuplicateEntry { key: String },

    #[error("include cycle through {0}")]
    Cycle(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0} must contain a mapping of node names")]
    NotAMapping(String),
}

/// A parsed `#include` directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub target: String,
    pub prefix: Option<String>,
}

impl Include {
    /// Parse a directive found in a file whose own keys carry `prefix`
    pub fn parse(statement: &str, prefix: Option<&str>) -> Result<Self, IncludeError> {
        let parts: Vec<&str> = statement.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(IncludeError::MalformedStatement(statement.to_string()));
        }
        let prefix = match (prefix, parts.get(2)) {
            (Some(outer), Some(inner)) => Some(format!("{outer}.{inner}")),
            (None, Some(inner)) => Some(inner.to_string()),
            (outer, None) => outer.map(str::to_string),
        };
        Ok(Self {
            target: parts[1].to_string(),
            prefix,
        })
    }

    pub fn resolve_path(&self, include_dirs: &[PathBuf]) -> Result<PathBuf, IncludeError> {
        include_dirs
            .iter()
            .map(|dir| dir.join(&self.target))
            .find(|path| path.exists())
            .ok_or_else(|| IncludeError::NotFound {
                target: self.target.clone(),
                searched: include_dirs.iter().map(|d| d.display().to_string()).collect(),
            })
    }
}

/// A loaded vspec file with all of its includes resolved
#[derive(Debug, Clone)]
pub struct VSpec {
    pub source: PathBuf,
    pub prefix: Option<String>,
    pub data: Mapping,
}

impl VSpec {
    pub fn load(
        source: &Path,
        include_dirs: &[PathBuf],
        prefix: Option<&str>,
    ) -> Result<Self, IncludeError> {
        let mut stack = vec![];
        Self::load_nested(source, include_dirs, prefix, &mut stack)
    }

    fn load_nested(
        source: &Path,
        include_dirs: &[PathBuf],
        prefix: Option<&str>,
        stack: &mut Vec<PathBuf>,
    ) -> Result<Self, IncludeError> {
        let canonical = source.canonicalize().unwrap_or_else(|_| source.to_path_buf());
        if stack.contains(&canonical) {
            return Err(IncludeError::Cycle(source.display().to_string()));
        }

        let path = source.display().to_string();
        let content = std::fs::read_to_string(source).map_err(|e| IncludeError::Io {
            path: path.clone(),
            source: e,
        })?;

        let mut data = parse_mapping(&content, &path)?;
        if let Some(prefix) = prefix {
            data = data
                .into_iter()
                .map(|(k, v)| match k {
                    Value::String(key) => (Value::String(format!("{prefix}.{key}")), v),
                    other => (other, v),
                })
                .collect();
        }

        let mut search_dirs: Vec<PathBuf> = vec![];
        if let Some(parent) = source.parent() {
            search_dirs.push(parent.to_path_buf());
        }
        for dir in include_dirs {
            if !search_dirs.contains(dir) {
                search_dirs.push(dir.clone());
            }
        }
        debug!("Include dirs for {}: {:?}", path, search_dirs);

        stack.push(canonical);
        for statement in include_statements(&content) {
            let include = Include::parse(statement, prefix)?;
            let target = include.resolve_path(&search_dirs)?;
            debug!("Including {} (prefix {:?})", target.display(), include.prefix);
            let nested =
                Self::load_nested(&target, include_dirs, include.prefix.as_deref(), stack)?;
            strict_update(&mut data, nested.data)?;
        }
        stack.pop();

        Ok(Self {
            source: source.to_path_buf(),
            prefix: prefix.map(str::to_string),
            data,
        })
    }

    /// Fold `other` into this spec, later values winning per nested key
    pub fn update(&mut self, other: VSpec) {
        deep_update(&mut self.data, other.data);
    }
}

fn include_statements(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.strip_prefix(INCLUDE_DIRECTIVE)
                .map_or(false, |rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        })
}

fn parse_mapping(content: &str, path: &str) -> Result<Mapping, IncludeError> {
    let doc: Value = serde_yaml::from_str(content).map_err(|source| IncludeError::Yaml {
        path: path.to_string(),
        source,
    })?;
    match doc {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(m) => Ok(m),
        _ => Err(IncludeError::NotAMapping(path.to_string())),
    }
}

/// Insert every entry of `update`, refusing keys `base` already has
pub fn strict_update(base: &mut Mapping, update: Mapping) -> Result<(), IncludeError> {
    for (key, value) in update {
        if let Some(current) = base.get(&key) {
            warn!("Spec conflict on {:?}: current {:?}, requested {:?}", key, current, value);
            let key = key.as_str().map_or_else(|| format!("{:?}", key), str::to_string);
            return Err(IncludeError::DuplicateEntry { key });
        }
        base.insert(key, value);
    }
    Ok(())
}

/// Recursively merge mappings; non-mapping values in `update` replace
pub fn deep_update(base: &mut Mapping, update: Mapping) {
    for (key, value) in update {
        match (base.get_mut(&key), value) {
            (Some(Value::Mapping(current)), Value::Mapping(incoming)) => {
                deep_update(current, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Load one or more vspec files. Later files refine earlier ones.
pub fn load_vspec(include_dirs: &[PathBuf], specs: &[PathBuf]) -> Result<VSpec, IncludeError> {
    let mut merged: Option<VSpec> = None;
    for spec in specs {
        info!("Loading vspec: {}", spec.display());
        let loaded = VSpec::load(spec, include_dirs, None)?;
        match merged.as_mut() {
            Some(base) => base.update(loaded),
            None => merged = Some(loaded),
        }
    }
    merged.ok_or_else(|| IncludeError::NotFound {
        target: "vspec".to_string(),
        searched: vec![],
    })
}
