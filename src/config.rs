//! Run configuration
//!
//! A run is described by a YAML file:
//!
//! ```yaml
//! vspec: spec/VehicleSignalSpecification.vspec
//! include_dirs: [spec]
//! overlays: [overlays/seats.vspec]
//! units: [spec/units.yaml]
//! quantities: [spec/quantities.yaml]
//! types: []
//! expand: true
//! uuid: false
//! strict: false
//! aborts: [name-style]
//! ignore: [unknown-attribute]
//! extended_attributes: [x-owner]
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use vspec_core::CheckLevel;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "VSPEC_CONFIG";

/// Config file looked up in the working directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "vspec.yaml";

const DEFAULT_UNITS_FILE: &str = "units.yaml";
const DEFAULT_QUANTITIES_FILE: &str = "quantities.yaml";

/// Policy categories that can be promoted to fatal or silenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortCategory {
    NameStyle,
    UnknownAttribute,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub vspec: PathBuf,
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub overlays: Vec<PathBuf>,
    #[serde(default)]
    pub units: Vec<PathBuf>,
    #[serde(default)]
    pub quantities: Vec<PathBuf>,
    #[serde(default)]
    pub types: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub expand: bool,
    #[serde(default)]
    pub uuid: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub aborts: Vec<AbortCategory>,
    #[serde(default)]
    pub ignore: Vec<AbortCategory>,
    #[serde(default)]
    pub extended_attributes: Vec<String>,
}

impl PipelineConfig {
    pub fn new(vspec: impl Into<PathBuf>) -> Self {
        Self {
            vspec: vspec.into(),
            include_dirs: vec![],
            overlays: vec![],
            units: vec![],
            quantities: vec![],
            types: vec![],
            expand: true,
            uuid: false,
            strict: false,
            aborts: vec![],
            ignore: vec![],
            extended_attributes: vec![],
        }
    }

    /// `strict` and `aborts` win over `ignore`
    fn level(&self, category: AbortCategory) -> CheckLevel {
        if self.strict || self.aborts.contains(&category) {
            CheckLevel::Fail
        } else if self.ignore.contains(&category) {
            CheckLevel::Ignore
        } else {
            CheckLevel::Warn
        }
    }

    pub fn naming_level(&self) -> CheckLevel {
        self.level(AbortCategory::NameStyle)
    }

    pub fn extra_attribute_level(&self) -> CheckLevel {
        self.level(AbortCategory::UnknownAttribute)
    }

    /// Unit files to load, falling back to `units.yaml` next to the vspec
    pub fn unit_files(&self) -> Vec<PathBuf> {
        self.files_or_default(&self.units, DEFAULT_UNITS_FILE, "units")
    }

    /// Quantity files to load, falling back to `quantities.yaml` next to the vspec
    pub fn quantity_files(&self) -> Vec<PathBuf> {
        self.files_or_default(&self.quantities, DEFAULT_QUANTITIES_FILE, "quantities")
    }

    fn files_or_default(&self, given: &[PathBuf], default_name: &str, what: &str) -> Vec<PathBuf> {
        if !given.is_empty() {
            return given.to_vec();
        }
        let default = self
            .vspec
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(default_name);
        if default.exists() {
            info!("No {} given, using {}", what, default.display());
            vec![default]
        } else {
            warn!(
                "No {} given and no {} next to {}",
                what,
                default_name,
                self.vspec.display()
            );
            vec![]
        }
    }

    /// Make every relative path relative to `base`
    pub fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.vspec);
        for list in [
            &mut self.include_dirs,
            &mut self.overlays,
            &mut self.units,
            &mut self.quantities,
            &mut self.types,
        ] {
            list.iter_mut().for_each(join);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vspec.as_os_str().is_empty() {
            bail!("'vspec' must name the root vspec file");
        }
        Ok(())
    }
}

/// Locates and loads the run configuration
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create loader from VSPEC_CONFIG env var or default to ./vspec.yaml
    pub fn from_env() -> Self {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::new(path)
    }

    /// Explicit path if given, otherwise [`ConfigLoader::from_env`]
    pub fn resolve(explicit: Option<PathBuf>) -> Self {
        explicit.map_or_else(Self::from_env, Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<PipelineConfig> {
        info!("Loading run configuration from {}", self.path.display());

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        let mut config: PipelineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", self.path.display()))?;

        if let Some(base) = self.path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config: PipelineConfig = serde_yaml::from_str("vspec: root.vspec\n").unwrap();
        assert_eq!(config, PipelineConfig::new("root.vspec"));
        assert!(config.expand);
        assert_eq!(config.naming_level(), CheckLevel::Warn);
    }

    #[test]
    fn test_levels_follow_strict_and_aborts() {
        let mut config = PipelineConfig::new("root.vspec");
        config.aborts = vec![AbortCategory::UnknownAttribute];
        assert_eq!(config.naming_level(), CheckLevel::Warn);
        assert_eq!(config.extra_attribute_level(), CheckLevel::Fail);

        config.strict = true;
        assert_eq!(config.naming_level(), CheckLevel::Fail);
    }

    #[test]
    fn test_ignored_category_is_silenced() {
        let mut config: PipelineConfig =
            serde_yaml::from_str("vspec: root.vspec\nignore: [name-style]\n").unwrap();
        assert_eq!(config.naming_level(), CheckLevel::Ignore);
        assert_eq!(config.extra_attribute_level(), CheckLevel::Warn);

        config.aborts = vec![AbortCategory::NameStyle];
        assert_eq!(config.naming_level(), CheckLevel::Fail);

        config.aborts.clear();
        config.strict = true;
        assert_eq!(config.naming_level(), CheckLevel::Fail);
    }

    #[test]
    fn test_load_rebases_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(
            &path,
            "vspec: spec/root.vspec\ninclude_dirs: [inc]\naborts: [name-style]\nuuid: true\n",
        )
        .unwrap();

        let config = ConfigLoader::new(&path).load().unwrap();
        assert_eq!(config.vspec, dir.path().join("spec/root.vspec"));
        assert_eq!(config.include_dirs, vec![dir.path().join("inc")]);
        assert_eq!(config.aborts, vec![AbortCategory::NameStyle]);
        assert!(config.uuid);
    }

    #[test]
    fn test_missing_vspec_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, "strict: true\n").unwrap();
        assert!(ConfigLoader::new(&path).load().is_err());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.yaml");
        fs::write(&path, "vspec: a.vspec\nexpnad: false\n").unwrap();
        assert!(ConfigLoader::new(&path).load().is_err());
    }

    #[test]
    fn test_default_unit_discovery() {
        let dir = TempDir::new().unwrap();
        let vspec = dir.path().join("root.vspec");
        let config = PipelineConfig::new(&vspec);
        assert!(config.unit_files().is_empty());

        fs::write(dir.path().join("units.yaml"), "").unwrap();
        assert_eq!(config.unit_files(), vec![dir.path().join("units.yaml")]);
        assert!(config.quantity_files().is_empty());
    }
}
