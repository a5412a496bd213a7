//! Instance expander
//!
//! Rewrites every branch carrying `instances` into concrete per-instance
//! subtrees. Children marked `instantiate` form the template and are copied
//! below each generated instance; other children stay where they are.
//!
//! Nodes that already exist at a generated path win over the template: an
//! explicit `Door.Row1.IsOpen` keeps its own payload while `Door.Row2.IsOpen`
//! is filled in from the template. Autogenerated placeholders at such paths
//! take the generated payload instead.
//!
//! Expansion runs to a fixed point, since copied templates may themselves
//! carry `instances`.

use thiserror::Error;
use tracing::{debug, info};

use crate::model::{ModelError, NodeData, NodeError, NodeKind};
use crate::tree::{Node, NodeId, Tree};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpansionError {
    #[error("invalid instance entry '{entry}': {reason}")]
    InvalidExpansionEntry { entry: String, reason: String },

    #[error(transparent)]
    Node(#[from] NodeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpansionStats {
    pub iterations: usize,
    pub expanded_nodes: usize,
    pub created_nodes: usize,
}

fn pending_instance_nodes(tree: &Tree) -> Vec<NodeId> {
    tree.preorder()
        .into_iter()
        .filter(|id| !tree.node(*id).data.instances().is_empty())
        .collect()
}

/// Expand all instance declarations in `tree`
pub fn expand_instances(tree: &mut Tree) -> Result<ExpansionStats, ExpansionError> {
    let mut stats = ExpansionStats::default();
    let mut pending = pending_instance_nodes(tree);
    while !pending.is_empty() {
        stats.iterations += 1;
        for id in pending {
            // may sit inside a template detached earlier in this pass
            if !tree.is_attached(id) {
                continue;
            }
            stats.created_nodes += expand_node(tree, id)?;
            stats.expanded_nodes += 1;
        }
        pending = pending_instance_nodes(tree);
    }
    info!("Instance expand iterations: {}", stats.iterations);
    Ok(stats)
}

/// Expand one node, returning how many nodes were created
fn expand_node(tree: &mut Tree, id: NodeId) -> Result<usize, ExpansionError> {
    let levels = tree
        .node(id)
        .data
        .instances()
        .iter()
        .map(|level| level.names())
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Expanding '{}' over {} level(s)", tree.fqn(id), levels.len());

    let first_level: &[String] = levels.first().map(Vec::as_slice).unwrap_or(&[]);
    let templates: Vec<NodeId> = tree
        .children(id)
        .iter()
        .copied()
        .filter(|c| {
            let child = tree.node(*c);
            child.data.common.instantiate && !first_level.contains(&child.name)
        })
        .collect();
    for template in &templates {
        tree.detach(*template);
    }

    let mut proto = tree.node(id).data.clone();
    proto.clear_instances();

    let before = tree.node_count();
    let mut frontier = vec![id];
    for names in &levels {
        let mut next = Vec::with_capacity(frontier.len() * names.len());
        for parent in frontier {
            let mut ordered = Vec::with_capacity(names.len());
            for name in names {
                ordered.push(instance_node(tree, parent, name, &proto)?);
            }
            tree.reorder_children(parent, &ordered);
            next.extend(ordered);
        }
        frontier = next;
    }

    for leaf in frontier {
        splice_templates(tree, &templates, leaf);
    }
    tree.node_mut(id).data.clear_instances();
    Ok(tree.node_count().saturating_sub(before))
}

/// Find or create the instance child `name` of `parent`
fn instance_node(
    tree: &mut Tree,
    parent: NodeId,
    name: &str,
    proto: &NodeData,
) -> Result<NodeId, ExpansionError> {
    let Some(existing) = tree.child_named(parent, name) else {
        return Ok(tree.add_child(parent, Node::new(name, proto.clone())));
    };

    let node = tree.node(existing);
    if node.data.kind() != NodeKind::Branch {
        return Err(NodeError {
            fqn: tree.fqn(existing),
            source: ModelError::Invariant {
                field: "instances".to_string(),
                reason: format!("instance '{name}' collides with a {}", node.data.kind()),
            },
        }
        .into());
    }
    if node.autogenerated {
        let node = tree.node_mut(existing);
        node.data = proto.clone();
        node.autogenerated = false;
    }
    Ok(existing)
}

/// Copy template subtrees below `target`, keeping nodes that already exist
fn splice_templates(tree: &mut Tree, templates: &[NodeId], target: NodeId) {
    let mut ordered = Vec::with_capacity(templates.len());
    for &template in templates {
        let name = tree.node(template).name.clone();
        match tree.child_named(target, &name) {
            Some(existing) => {
                if tree.node(existing).autogenerated {
                    let data = tree.node(template).data.clone();
                    let node = tree.node_mut(existing);
                    node.data = data;
                    node.autogenerated = false;
                }
                let grandchildren = tree.children(template).to_vec();
                splice_templates(tree, &grandchildren, existing);
                ordered.push(existing);
            }
            None => ordered.push(tree.copy_subtree(template, target)),
        }
    }
    tree.reorder_children(target, &ordered);
}
