//! vspec-core: the vehicle signal specification compiler core
//!
//! Pure tree logic with no CLI or process concerns:
//! - Datatype and unit/quantity registries
//! - Node payload model with cross-field validation
//! - `#include` preprocessing of vspec files
//! - Tree building from flat fqn maps, with orphan handling
//! - Instance expansion and overlay merging
//! - Naming, attribute and structure validators
//!
//! Registries are explicit values: build a [`Registry`] per run, populate it
//! and pass it by reference to the stages that resolve types or units.

pub mod builder;
pub mod datatypes;
pub mod error;
pub mod expander;
pub mod include;
pub mod instances;
pub mod model;
pub mod overlay;
pub mod registry;
pub mod tree;
pub mod types;
pub mod units;
pub mod validator;

// Re-export commonly used types
pub use builder::{build_tree, BuildError, BuildMode, BuildOutcome, Orphan};
pub use datatypes::{DatatypeError, DatatypeRegistry};
pub use error::{CoreError, CoreResult};
pub use expander::{expand_instances, ExpansionError, ExpansionStats};
pub use include::{load_vspec, Include, IncludeError, VSpec};
pub use model::{ModelError, NodeData, NodeError, NodeKind};
pub use overlay::{complete_overlay_entries, merge, MergeStats, OverlayError};
pub use registry::Registry;
pub use tree::{Node, NodeId, Tree};
pub use types::{load_types, TypesError};
pub use units::{QuantityDescriptor, UnitDescriptor, UnitError, UnitRegistry};
pub use validator::{
    check_extra_attributes, check_naming, check_parents, CheckLevel, PolicyError, Violation,
};
