//! Post-expansion tree validators
//!
//! Policy checks (naming style, unknown attributes) collect every violation
//! before reporting. Whether a category is ignored, logged or fatal is the
//! caller's [`CheckLevel`] choice. Structural parent checks are always fatal.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::model::NodeKind;
use crate::tree::Tree;

static CAMEL_CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").unwrap());

const BOOLEAN_PREFIX: &str = "Is";

// =============================================================================
// TYPES
// =============================================================================

/// How a policy category is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckLevel {
    Ignore,
    #[default]
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub reason: String,
}

impl Violation {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.path, self.reason)
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error("name violations detected: {}", join(.0))]
    NameViolations(Vec<Violation>),

    #[error("unknown attributes detected: {}", join(.0))]
    ExtraAttributes(Vec<Violation>),

    #[error("invalid parent for: {}", .0.join(", "))]
    InvalidParents(Vec<String>),
}

// =============================================================================
// COLLECTORS
// =============================================================================

/// Names that are not CamelCase, and boolean leaves not starting with `Is`
pub fn naming_violations(tree: &Tree) -> Vec<Violation> {
    let mut violations = vec![];
    for id in tree.preorder() {
        let node = tree.node(id);
        if !CAMEL_CASE.is_match(&node.name) {
            violations.push(Violation::new(tree.fqn(id), "not CamelCase"));
        }
        if node.data.datatype() == Some("boolean") && !node.name.starts_with(BOOLEAN_PREFIX) {
            violations.push(Violation::new(
                tree.fqn(id),
                format!("not starting with '{BOOLEAN_PREFIX}'"),
            ));
        }
    }
    if !violations.is_empty() {
        info!("Naming violations: {}", violations.len());
    }
    violations
}

/// Extra attributes not named in `allowed`, reported per attribute
pub fn extra_attribute_violations(tree: &Tree, allowed: &[String]) -> Vec<Violation> {
    if !allowed.is_empty() {
        info!("Allowed attributes: {:?}", allowed);
    }
    let mut violations = vec![];
    for id in tree.preorder() {
        for field in tree.node(id).data.additional_fields() {
            if !allowed.contains(&field) {
                violations.push(Violation::new(tree.fqn(id), field));
            }
        }
    }
    if !violations.is_empty() {
        info!("Forbidden additional attributes: {}", violations.len());
    }
    violations
}

/// Nodes whose parent kind cannot hold them: properties belong to structs,
/// everything else to branches
pub fn invalid_parents(tree: &Tree) -> Vec<String> {
    tree.preorder()
        .into_iter()
        .filter_map(|id| {
            let parent = tree.parent(id)?;
            let expected = match tree.node(id).data.kind() {
                NodeKind::Property => NodeKind::Struct,
                _ => NodeKind::Branch,
            };
            (tree.node(parent).data.kind() != expected).then(|| tree.fqn(id))
        })
        .collect()
}

/// Properties that are not directly below a struct
pub fn property_orphans(tree: &Tree) -> Vec<String> {
    tree.preorder()
        .into_iter()
        .filter(|id| tree.node(*id).data.kind() == NodeKind::Property)
        .filter(|id| {
            tree.parent(*id)
                .map_or(true, |p| tree.node(p).data.kind() != NodeKind::Struct)
        })
        .map(|id| tree.fqn(id))
        .collect()
}

// =============================================================================
// ENFORCEMENT
// =============================================================================

pub fn check_naming(tree: &Tree, level: CheckLevel) -> Result<(), PolicyError> {
    if level == CheckLevel::Ignore {
        return Ok(());
    }
    let violations = naming_violations(tree);
    enforce(level, violations, "Name violation", PolicyError::NameViolations)
}

pub fn check_extra_attributes(
    tree: &Tree,
    allowed: &[String],
    level: CheckLevel,
) -> Result<(), PolicyError> {
    if level == CheckLevel::Ignore {
        return Ok(());
    }
    let violations = extra_attribute_violations(tree, allowed);
    enforce(level, violations, "Unknown extra attribute", PolicyError::ExtraAttributes)
}

pub fn check_parents(tree: &Tree) -> Result<(), PolicyError> {
    let invalid = invalid_parents(tree);
    if invalid.is_empty() {
        return Ok(());
    }
    for fqn in &invalid {
        error!("Invalid parent for '{}'", fqn);
    }
    Err(PolicyError::InvalidParents(invalid))
}

fn enforce(
    level: CheckLevel,
    violations: Vec<Violation>,
    label: &str,
    into_error: fn(Vec<Violation>) -> PolicyError,
) -> Result<(), PolicyError> {
    if violations.is_empty() {
        return Ok(());
    }
    match level {
        CheckLevel::Fail => {
            for v in &violations {
                error!("{}: {}", label, v);
            }
            Err(into_error(violations))
        }
        _ => {
            for v in &violations {
                warn!("{}: {}", label, v);
            }
            Ok(())
        }
    }
}
