//! Compiler pipeline
//!
//! Turns a [`PipelineConfig`] into the final signal tree (and the optional
//! user type tree) ready for exporters. Stages run in a fixed order:
//!
//! 1. quantities, units and user types populate a fresh [`Registry`]
//! 2. the vspec and its includes are built, orphans reattached
//! 3. instances are expanded and deleted nodes pruned
//! 4. each overlay is built, expanded and merged, then the tree is expanded
//!    again and pruned
//! 5. uuids, when requested
//! 6. structural checks, then naming and extra-attribute policies
//!
//! The first error aborts the run. Nothing here exits the process.

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};
use vspec_core::{
    build_tree, check_extra_attributes, check_naming, check_parents, complete_overlay_entries,
    expand_instances, load_types, load_vspec, merge, BuildMode, CheckLevel, Registry, Tree,
    VSpec,
};

use crate::config::PipelineConfig;
use crate::error::{CompilerError, Result};

/// Everything a run produces
#[derive(Debug)]
pub struct Trees {
    pub root: Tree,
    pub types_root: Option<Tree>,
    pub registry: Registry,
}

// =============================================================================
// STAGES
// =============================================================================

fn load_registry(config: &PipelineConfig) -> Result<Registry> {
    let mut registry = Registry::new();
    for file in config.quantity_files() {
        registry.load_quantity_file(&file)?;
    }
    for file in config.unit_files() {
        registry.load_unit_file(&file)?;
    }
    info!(
        "Registry loaded, quantities={}, units={}",
        registry.units.quantity_count(),
        registry.units.unit_count()
    );
    Ok(registry)
}

fn expand(tree: &mut Tree, config: &PipelineConfig) -> Result<()> {
    if config.expand {
        expand_instances(tree)?;
    } else {
        debug!("Instance expansion disabled");
    }
    Ok(())
}

fn apply_overlays(tree: &mut Tree, config: &PipelineConfig, registry: &Registry) -> Result<()> {
    for path in &config.overlays {
        info!("Applying overlay: {}", path.display());
        let mut overlay = VSpec::load(path, &config.include_dirs, None)?;
        complete_overlay_entries(&mut overlay.data, tree);

        let mut overlay_tree = build_tree(&overlay.data, registry, BuildMode::Overlay)?.tree;
        expand(&mut overlay_tree, config)?;
        merge(tree, &overlay_tree, registry)?;
    }
    if !config.overlays.is_empty() {
        expand(tree, config)?;
        let removed = tree.remove_delete_nodes();
        if removed > 0 {
            info!("Overlays removed {} node(s)", removed);
        }
    }
    Ok(())
}

fn check_trees(trees: &Trees, config: &PipelineConfig) -> Result<()> {
    check_parents(&trees.root)?;
    if let Some(types_root) = &trees.types_root {
        check_parents(types_root)?;
        check_extra_attributes(types_root, &config.extended_attributes, CheckLevel::Fail)?;
    }
    check_naming(&trees.root, config.naming_level())?;
    check_extra_attributes(
        &trees.root,
        &config.extended_attributes,
        config.extra_attribute_level(),
    )?;
    Ok(())
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Run every stage and return the finished trees
pub fn get_trees(config: &PipelineConfig) -> Result<Trees> {
    config
        .validate()
        .map_err(|e| CompilerError::Config(e.to_string()))?;

    let mut registry = load_registry(config)?;
    let mut types_root = load_types(&config.types, &config.include_dirs, &mut registry)?;

    let spec = load_vspec(&config.include_dirs, std::slice::from_ref(&config.vspec))?;
    let mut root = build_tree(&spec.data, &registry, BuildMode::ConnectOrphans)?.tree;
    expand(&mut root, config)?;
    root.remove_delete_nodes();

    apply_overlays(&mut root, config, &registry)?;

    if config.uuid {
        root.add_uuids();
        if let Some(types_root) = types_root.as_mut() {
            types_root.add_uuids();
        }
    }

    let trees = Trees {
        root,
        types_root,
        registry,
    };
    check_trees(&trees, config)?;
    info!(
        "Compiled '{}' with {} node(s)",
        trees.root.node(trees.root.root()).name,
        trees.root.node_count()
    );
    Ok(trees)
}

/// Flat fqn -> payload view of `tree`, the shape exporters consume
pub fn flatten(tree: &Tree, config: &PipelineConfig) -> Mapping {
    tree.as_flat_dict(!config.extended_attributes.is_empty())
}

pub fn to_yaml(tree: &Tree, config: &PipelineConfig) -> Result<String> {
    Ok(serde_yaml::to_string(&Value::Mapping(flatten(tree, config)))?)
}

pub fn to_json(tree: &Tree, config: &PipelineConfig) -> Result<String> {
    Ok(serde_json::to_string_pretty(&Value::Mapping(flatten(
        tree, config,
    )))?)
}
