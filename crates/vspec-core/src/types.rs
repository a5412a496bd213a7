//! User type trees
//!
//! Struct and property definitions live in their own vspec files. Every
//! struct fqn becomes a dynamic datatype, registered before its file is
//! built so properties can use structs from the same or an earlier file.
//! All type files must share one root; later files are merged into the tree
//! of the first.

use std::path::PathBuf;

use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::builder::{build_tree, BuildError, BuildMode};
use crate::datatypes::DatatypeError;
use crate::include::{IncludeError, VSpec};
use crate::model::NodeKind;
use crate::overlay::{merge, OverlayError};
use crate::registry::Registry;
use crate::tree::Tree;
use crate::validator::property_orphans;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("struct types must be below a root branch: {}", .0.join(", "))]
    RootTypes(Vec<String>),

    #[error("properties outside of a struct: {}", .0.join(", "))]
    PropertyOrphans(Vec<String>),

    #[error("type tree root '{0}' differs from the first type tree")]
    MultipleTypeTrees(String),

    #[error(transparent)]
    Include(#[from] IncludeError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Datatype(#[from] DatatypeError),

    #[error(transparent)]
    Merge(#[from] OverlayError),
}

/// Load type files into one tree, registering every struct as a datatype
pub fn load_types(
    files: &[PathBuf],
    include_dirs: &[PathBuf],
    registry: &mut Registry,
) -> Result<Option<Tree>, TypesError> {
    if files.is_empty() {
        info!("No user 'types' defined");
        return Ok(None);
    }

    let mut types_root: Option<Tree> = None;
    for file in files {
        info!("Loading types: {}", file.display());
        let spec = VSpec::load(file, include_dirs, None)?;

        let structs: Vec<String> = spec
            .data
            .iter()
            .filter(|(_, v)| v.get("type").and_then(Value::as_str) == Some(NodeKind::Struct.as_str()))
            .filter_map(|(k, _)| k.as_str().map(str::to_string))
            .collect();
        let unqualified: Vec<String> = structs.iter().filter(|s| !s.contains('.')).cloned().collect();
        if !unqualified.is_empty() {
            return Err(TypesError::RootTypes(unqualified));
        }
        for name in &structs {
            if registry.lookup(name).is_none() {
                debug!("Registering struct type '{}'", name);
                registry.register_dynamic_type(name)?;
            }
        }

        let outcome = build_tree(&spec.data, registry, BuildMode::Strict)?;
        if !outcome.orphans.is_empty() {
            return Err(BuildError::UnresolvedOrphans(
                outcome.orphans.into_iter().map(|o| o.fqn).collect(),
            )
            .into());
        }
        let tree = outcome.tree;

        match types_root.as_mut() {
            None => types_root = Some(tree),
            Some(root) => {
                let name = &tree.node(tree.root()).name;
                if *name != root.node(root.root()).name {
                    return Err(TypesError::MultipleTypeTrees(name.clone()));
                }
                merge(root, &tree, registry)?;
            }
        }
    }

    info!(
        "Dynamic datatypes added={}",
        registry.datatypes.dynamic_types().len()
    );

    if let Some(root) = &types_root {
        let orphans = property_orphans(root);
        if !orphans.is_empty() {
            return Err(TypesError::PropertyOrphans(orphans));
        }
    }
    Ok(types_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    const POINT: &str = r#"
Types:
  type: branch
  description: types
Types.Point:
  type: struct
  description: point
Types.Point.X:
  type: property
  description: x
  datatype: float
Types.Point.Y:
  type: property
  description: y
  datatype: float
"#;

    #[test]
    fn test_structs_are_registered_across_files() {
        let dir = TempDir::new().unwrap();
        let first = write(dir.path(), "point.vspec", POINT);
        let second = write(
            dir.path(),
            "line.vspec",
            r#"
Types:
  type: branch
  description: types
Types.Line:
  type: struct
  description: line
Types.Line.Points:
  type: property
  description: ends
  datatype: Types.Point[]
  arraysize: 2
"#,
        );
        let mut registry = Registry::new();
        let tree = load_types(&[first, second], &[], &mut registry)
            .unwrap()
            .unwrap();
        assert!(registry.lookup("Types.Point").is_some());
        assert!(registry.lookup("Types.Line").is_some());
        assert!(tree.find("Types.Line.Points").is_some());
        assert!(tree.find("Types.Point.X").is_some());
    }

    #[test]
    fn test_no_files_is_no_tree() {
        let mut registry = Registry::new();
        assert!(load_types(&[], &[], &mut registry).unwrap().is_none());
    }

    #[test]
    fn test_unqualified_struct_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = write(dir.path(), "t.vspec", "Point:\n  type: struct\n  description: p\n");
        let mut registry = Registry::new();
        assert!(matches!(
            load_types(&[file], &[], &mut registry),
            Err(TypesError::RootTypes(names)) if names == vec!["Point".to_string()]
        ));
    }

    #[test]
    fn test_second_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let first = write(dir.path(), "a.vspec", POINT);
        let second = write(dir.path(), "b.vspec", "Other:\n  type: branch\n  description: o\n");
        let mut registry = Registry::new();
        assert!(matches!(
            load_types(&[first, second], &[], &mut registry),
            Err(TypesError::MultipleTypeTrees(name)) if name == "Other"
        ));
    }

    #[test]
    fn test_property_outside_struct_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = write(
            dir.path(),
            "t.vspec",
            "Types:\n  type: branch\n  description: t\nTypes.Stray:\n  type: property\n  description: s\n  datatype: uint8\n",
        );
        let mut registry = Registry::new();
        assert!(matches!(
            load_types(&[file], &[], &mut registry),
            Err(TypesError::PropertyOrphans(names)) if names == vec!["Types.Stray".to_string()]
        ));
    }
}
