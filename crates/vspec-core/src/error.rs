//! Umbrella error for the compiler core
//!
//! Each stage owns its error enum; [`CoreError`] lets callers propagate any
//! of them with `?`.

use thiserror::Error;

use crate::builder::BuildError;
use crate::datatypes::DatatypeError;
use crate::expander::ExpansionError;
use crate::include::IncludeError;
use crate::model::NodeError;
use crate::overlay::OverlayError;
use crate::types::TypesError;
use crate::units::UnitError;
use crate::validator::PolicyError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Datatype error: {0}")]
    Datatype(#[from] DatatypeError),

    #[error("Unit error: {0}")]
    Unit(#[from] UnitError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Include error: {0}")]
    Include(#[from] IncludeError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Expansion error: {0}")]
    Expansion(#[from] ExpansionError),

    #[error("Overlay error: {0}")]
    Overlay(#[from] OverlayError),

    #[error("Types error: {0}")]
    Types(#[from] TypesError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

pub type CoreResult<T> = Result<T, CoreError>;
