//! Errors surfaced by the compiler pipeline
//!
//! Every stage error from `vspec-core` funnels through [`CoreError`]; the
//! remaining variants cover run configuration and output encoding.

use thiserror::Error;
use vspec_core::{
    BuildError, CoreError, DatatypeError, ExpansionError, IncludeError, NodeError, OverlayError,
    PolicyError, TypesError, UnitError,
};

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

macro_rules! from_core {
    ($($stage:ty),* $(,)?) => {
        $(
            impl From<$stage> for CompilerError {
                fn from(err: $stage) -> Self {
                    CompilerError::Core(CoreError::from(err))
                }
            }
        )*
    };
}

from_core!(
    BuildError,
    DatatypeError,
    ExpansionError,
    IncludeError,
    NodeError,
    OverlayError,
    PolicyError,
    TypesError,
    UnitError,
);

pub type Result<T> = std::result::Result<T, CompilerError>;
