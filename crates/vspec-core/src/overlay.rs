//! Overlay merger
//!
//! Applies an overlay tree to a base tree by fully-qualified name. Both trees
//! are expected to be instance-expanded already, so overlay paths such as
//! `Vehicle.Seat.Row1.Height` address concrete nodes.
//!
//! - an overlay node whose fqn exists in the base overwrites every field it
//!   declares (type tag included); undeclared fields keep their base value
//!   and children are left alone
//! - any other overlay node is grafted with its subtree below its expected
//!   parent, autogenerating missing branches on the way
//! - autogenerated overlay nodes only connect subtrees and are skipped

use std::collections::HashSet;

use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::builder::expected_parent;
use crate::model::{NodeData, NodeError, NodeKind, BRANCH_KEYS, DATATYPE_KEYS};
use crate::registry::Registry;
use crate::tree::{NodeId, Tree};

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("overlay node '{fqn}' is not below base root '{root}'")]
    ForeignRoot { fqn: String, root: String },

    #[error(transparent)]
    Node(#[from] NodeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub overwritten: usize,
    pub added: usize,
    pub skipped: usize,
}

/// Fill the required keys (`type`, `description`, `datatype`) that an
/// overlay entry leaves out from the base node it refines, so overlays may
/// declare just the fields they change.
pub fn complete_overlay_entries(overlay: &mut Mapping, base: &Tree) {
    for (key, value) in overlay.iter_mut() {
        let (Some(fqn), Value::Mapping(entry)) = (key.as_str(), value) else {
            continue;
        };
        let Some(id) = base.find(fqn) else {
            continue;
        };
        let raw = base.node(id).data.to_raw();
        for required in ["type", "description", "datatype"] {
            if entry.contains_key(required) {
                continue;
            }
            if required == "datatype" && !declares_datatype_kind(entry, &raw) {
                continue;
            }
            if let Some(v) = raw.get(required) {
                debug!("Overlay '{}' inherits '{}' from base", fqn, required);
                entry.insert(Value::String(required.to_string()), v.clone());
            }
        }
    }
}

fn declares_datatype_kind(entry: &Mapping, base: &Mapping) -> bool {
    entry
        .get("type")
        .or_else(|| base.get("type"))
        .and_then(Value::as_str)
        .and_then(NodeKind::parse)
        .map_or(false, |k| k.has_datatype())
}

/// Payload of `base` refined by every field `overlay` declares
pub fn merged_payload(
    base: &NodeData,
    overlay: &NodeData,
    registry: &Registry,
) -> Result<NodeData, crate::model::ModelError> {
    let mut raw = base.to_raw();
    let kind = overlay.kind();
    if kind != base.kind() {
        if !kind.has_datatype() {
            for key in DATATYPE_KEYS {
                raw.remove(*key);
            }
        }
        if kind != NodeKind::Branch {
            for key in BRANCH_KEYS {
                raw.remove(*key);
            }
        }
    }
    for (key, value) in overlay.to_raw() {
        raw.insert(key, value);
    }
    NodeData::from_raw(&Value::Mapping(raw), registry)
}

/// Merge `overlay` into `base` in place
pub fn merge(base: &mut Tree, overlay: &Tree, registry: &Registry) -> Result<MergeStats, OverlayError> {
    let mut stats = MergeStats::default();
    let mut grafted: HashSet<NodeId> = HashSet::new();

    for oid in overlay.preorder() {
        if grafted.contains(&oid) {
            continue;
        }
        let onode = overlay.node(oid);
        let fqn = overlay.fqn(oid);
        if onode.autogenerated {
            debug!("Skipping autogenerated node '{}'", fqn);
            stats.skipped += 1;
            continue;
        }

        if let Some(bid) = base.find(&fqn) {
            info!("Overwriting node '{}'", fqn);
            let merged = merged_payload(&base.node(bid).data, &onode.data, registry)
                .map_err(|source| NodeError {
                    fqn: fqn.clone(),
                    source,
                })?;
            let node = base.node_mut(bid);
            node.data = merged;
            node.autogenerated = false;
            stats.overwritten += 1;
            continue;
        }

        let foreign = || OverlayError::ForeignRoot {
            fqn: fqn.clone(),
            root: base.node(base.root()).name.clone(),
        };
        let parent_fqn = expected_parent(&fqn).ok_or_else(foreign)?;
        let parent = match base.find(parent_fqn) {
            Some(parent) => parent,
            None => {
                let err = foreign();
                warn!(
                    "Parent '{}' of overlay node '{}' not found, creating it",
                    parent_fqn, fqn
                );
                base.ensure_path(parent_fqn).ok_or(err)?
            }
        };

        info!("Adding node '{}' from overlay", fqn);
        base.import_subtree(overlay, oid, parent);
        grafted.extend(overlay.preorder_from(oid));
        stats.added += 1;
    }

    info!(
        "Overlay merged, overwritten={}, added={}",
        stats.overwritten, stats.added
    );
    Ok(stats)
}
