//! vss-compiler: run orchestration for the vspec compiler
//!
//! This crate provides:
//! - Run configuration loading (`vspec.yaml`, `VSPEC_CONFIG`)
//! - The `get_trees` pipeline over `vspec-core`
//! - Flat YAML / JSON views of the finished tree
//!
//! Tree logic lives in `vspec-core`; this crate only sequences it.

pub mod config;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::{AbortCategory, ConfigLoader, PipelineConfig};
pub use error::{CompilerError, Result};
pub use pipeline::{flatten, get_trees, to_json, to_yaml, Trees};
pub use vspec_core;
