//! Tree builder
//!
//! Turns a flat `fqn -> payload` mapping into a rooted [`Tree`]. Entries may
//! come in any order: a node is attached as soon as its parent exists, and
//! children seen before their parent wait until it shows up.
//!
//! Nodes whose parent never appears are orphans. What happens to them
//! depends on the [`BuildMode`].

use std::collections::{BTreeMap, HashMap};

use serde_yaml::Mapping;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ModelError, NodeData, NodeError};
use crate::registry::Registry;
use crate::tree::{Arena, Node, NodeId, Tree, SEPARATOR};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no root node found")]
    NoRoots,

    #[error("multiple root nodes: {}", .0.join(", "))]
    MultipleRoots(Vec<String>),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("orphan nodes could not be attached: {}", .0.join(", "))]
    UnresolvedOrphans(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Orphans are left detached and returned to the caller
    Strict,
    /// Orphans below an existing ancestor are spliced in through
    /// autogenerated branches; any others are an error
    ConnectOrphans,
    /// Every missing ancestor, root included, is autogenerated on the spot
    Overlay,
}

#[derive(Debug, Clone)]
pub struct Orphan {
    pub fqn: String,
    pub id: NodeId,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub tree: Tree,
    pub orphans: Vec<Orphan>,
}

/// Syntactic parent of a dotted name
pub fn expected_parent(fqn: &str) -> Option<&str> {
    fqn.rsplit_once(SEPARATOR).map(|(parent, _)| parent)
}

pub fn node_name(fqn: &str) -> &str {
    fqn.rsplit_once(SEPARATOR).map_or(fqn, |(_, name)| name)
}

struct Builder {
    arena: Arena,
    /// fqn -> node, in construction order
    nodes: HashMap<String, NodeId>,
    order: Vec<String>,
    /// parent fqn -> children constructed before it
    waiting: BTreeMap<String, Vec<NodeId>>,
}

impl Builder {
    fn new() -> Self {
        Self {
            arena: Arena::new(),
            nodes: HashMap::new(),
            order: vec![],
            waiting: BTreeMap::new(),
        }
    }

    fn insert(&mut self, fqn: &str, node: Node) -> NodeId {
        let id = self.arena.alloc(node);
        self.nodes.insert(fqn.to_string(), id);
        self.order.push(fqn.to_string());
        id
    }

    fn add_entry(&mut self, fqn: &str, data: NodeData, mode: BuildMode) -> NodeId {
        // an overlay may already hold an autogenerated placeholder here
        if let Some(&existing) = self.nodes.get(fqn) {
            let node = self.arena.get_mut(existing);
            node.data = data;
            node.autogenerated = false;
            return existing;
        }

        let id = self.insert(fqn, Node::new(node_name(fqn), data));
        match expected_parent(fqn) {
            Some(parent) if self.nodes.contains_key(parent) => {
                self.arena.attach(self.nodes[parent], id);
            }
            Some(parent) if mode == BuildMode::Overlay => {
                warn!(
                    "Parent of '{}' not found, so automatically creating to build overlay tree.",
                    fqn
                );
                let parent_id = self.autocreate(parent);
                self.arena.attach(parent_id, id);
            }
            Some(parent) => {
                self.waiting.entry(parent.to_string()).or_default().push(id);
            }
            None => {}
        }
        self.adopt_waiting(fqn, id);
        id
    }

    fn adopt_waiting(&mut self, fqn: &str, id: NodeId) {
        if let Some(children) = self.waiting.remove(fqn) {
            for child in children {
                self.arena.attach(id, child);
            }
        }
    }

    /// Create an autogenerated branch at `path` and any missing ancestors
    fn autocreate(&mut self, path: &str) -> NodeId {
        info!("Implicitly creating branch '{}'", path);
        let id = self.insert(path, Node::autogenerated(node_name(path)));
        if let Some(parent) = expected_parent(path) {
            let parent_id = match self.nodes.get(parent) {
                Some(&existing) => existing,
                None => self.autocreate(parent),
            };
            self.arena.attach(parent_id, id);
        }
        self.adopt_waiting(path, id);
        id
    }

    fn unattached(&self) -> (Vec<(String, NodeId)>, Vec<(String, NodeId)>) {
        let mut roots = vec![];
        let mut orphans = vec![];
        for fqn in &self.order {
            let id = self.nodes[fqn];
            if self.arena.get(id).parent().is_some() {
                continue;
            }
            if fqn.contains(SEPARATOR) {
                orphans.push((fqn.clone(), id));
            } else {
                roots.push((fqn.clone(), id));
            }
        }
        (roots, orphans)
    }

    /// Splice each orphan under its nearest existing rooted ancestor.
    /// Returns the orphans that have no such ancestor.
    fn connect_orphans(&mut self, root: NodeId, mut orphans: Vec<(String, NodeId)>) -> Vec<String> {
        orphans.sort_by_key(|(fqn, _)| fqn.matches(SEPARATOR).count());
        let mut unresolved = vec![];
        for (fqn, id) in orphans {
            let mut missing = vec![];
            let mut anchor = None;
            let mut cursor = expected_parent(&fqn);
            while let Some(path) = cursor {
                if let Some(&existing) = self.nodes.get(path) {
                    anchor = Some(existing);
                    break;
                }
                missing.push(path.to_string());
                cursor = expected_parent(path);
            }

            let anchor = match anchor {
                Some(a) if self.arena.top(a) == root => a,
                _ => {
                    unresolved.push(fqn);
                    continue;
                }
            };

            let mut parent = anchor;
            for path in missing.iter().rev() {
                info!("Implicitly creating branch '{}'", path);
                let created = self.insert(path, Node::autogenerated(node_name(path)));
                self.arena.attach(parent, created);
                parent = created;
            }
            self.arena.attach(parent, id);
            debug!("Reattached orphan '{}'", fqn);
        }
        unresolved
    }
}

/// Build a tree from a flat fqn -> payload mapping
pub fn build_tree(
    data: &Mapping,
    registry: &Registry,
    mode: BuildMode,
) -> Result<BuildOutcome, BuildError> {
    let mut builder = Builder::new();

    for (key, value) in data {
        let fqn = key.as_str().ok_or_else(|| NodeError {
            fqn: format!("{:?}", key),
            source: ModelError::InvalidField {
                field: "name".to_string(),
                reason: "node names must be strings".to_string(),
            },
        })?;
        debug!("Building node '{}'", fqn);
        let payload = NodeData::from_raw(value, registry).map_err(|source| NodeError {
            fqn: fqn.to_string(),
            source,
        })?;
        builder.add_entry(fqn, payload, mode);
    }

    let (roots, orphans) = builder.unattached();
    let root = match roots.as_slice() {
        [] => return Err(BuildError::NoRoots),
        [(_, id)] => *id,
        many => {
            return Err(BuildError::MultipleRoots(
                many.iter().map(|(fqn, _)| fqn.clone()).collect(),
            ))
        }
    };

    if !orphans.is_empty() {
        warn!("Orphans: {}", orphans.len());
    }

    let orphans = match mode {
        BuildMode::ConnectOrphans if !orphans.is_empty() => {
            let unresolved = builder.connect_orphans(root, orphans);
            if !unresolved.is_empty() {
                return Err(BuildError::UnresolvedOrphans(unresolved));
            }
            vec![]
        }
        _ => orphans
            .into_iter()
            .map(|(fqn, id)| Orphan { fqn, id })
            .collect(),
    };

    let mut tree = Tree::new(builder.arena, root);
    // deletes may target instance paths, or reach the base through a merge;
    // those trees are pruned by the caller once expanded
    if mode == BuildMode::Strict {
        tree.remove_delete_nodes();
    }
    info!(
        "Tree, root='{}', size={}, height={}",
        tree.node(root).name,
        tree.node_count(),
        tree.height(root)
    );
    Ok(BuildOutcome { tree, orphans })
}
