//! Arena-backed vspec tree
//!
//! Nodes live in a flat arena and refer to each other by [`NodeId`]. A node
//! owns its ordered child list; the parent link is only used to rebuild
//! fully-qualified names. Detached subtrees stay in the arena but are no
//! longer reachable from the root.

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::NodeData;

pub const SEPARATOR: char = '.';

/// Seed for deterministic node uuids
const UUID_SEED: &str = "vehicle_signal_specification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub data: NodeData,
    pub uuid: Option<String>,
    /// Synthesized only to connect a subtree; carries no content of its own
    pub autogenerated: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(name: impl Into<String>, data: NodeData) -> Self {
        Self {
            name: name.into(),
            data,
            uuid: None,
            autogenerated: false,
            parent: None,
            children: vec![],
        }
    }

    pub fn autogenerated(name: impl Into<String>) -> Self {
        Self {
            autogenerated: true,
            ..Self::new(name, NodeData::autogenerated_branch())
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    fn detached_clone(&self) -> Self {
        Self {
            parent: None,
            children: vec![],
            ..self.clone()
        }
    }
}

/// Node storage shared by the builder and [`Tree`]
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Append `child` to `parent`, moving it from any previous parent
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn detach(&mut self, child: NodeId) {
        if let Some(parent) = self.nodes[child.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != child);
        }
    }

    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent)
            .children
            .iter()
            .copied()
            .find(|c| self.get(*c).name == name)
    }

    /// Walk parent links up to the topmost ancestor
    pub fn top(&self, mut id: NodeId) -> NodeId {
        while let Some(parent) = self.get(id).parent {
            id = parent;
        }
        id
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    arena: Arena,
    root: NodeId,
}

impl Tree {
    pub fn new(arena: Arena, root: NodeId) -> Self {
        Self { arena, root }
    }

    /// Single-node tree
    pub fn with_root(name: impl Into<String>, data: NodeData) -> Self {
        let mut arena = Arena::new();
        let root = arena.alloc(Node::new(name, data));
        Self { arena, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.arena.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.arena.get_mut(id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.arena.get(id).children()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena.get(id).parent()
    }

    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.arena.child_named(parent, name)
    }

    pub fn add_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.arena.alloc(node);
        self.arena.attach(parent, id);
        id
    }

    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.arena.attach(parent, child);
    }

    pub fn detach(&mut self, child: NodeId) {
        self.arena.detach(child);
    }

    /// Whether `id` is reachable from the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.arena.top(id) == self.root
    }

    // =========================================================================
    // PATHS
    // =========================================================================

    pub fn get_fqn(&self, id: NodeId, separator: &str) -> String {
        let mut names = vec![self.node(id).name.as_str()];
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            names.push(self.node(parent).name.as_str());
            current = parent;
        }
        names.reverse();
        names.join(separator)
    }

    pub fn fqn(&self, id: NodeId) -> String {
        self.get_fqn(id, ".")
    }

    pub fn find(&self, fqn: &str) -> Option<NodeId> {
        let mut parts = fqn.split(SEPARATOR);
        if parts.next()? != self.node(self.root).name {
            return None;
        }
        parts.try_fold(self.root, |id, name| self.child_named(id, name))
    }

    /// Resolve `fqn`, creating autogenerated branches for missing segments.
    /// Returns `None` when the path does not start at this tree's root.
    pub fn ensure_path(&mut self, fqn: &str) -> Option<NodeId> {
        let mut parts = fqn.split(SEPARATOR);
        if parts.next()? != self.node(self.root).name {
            return None;
        }
        let mut current = self.root;
        for name in parts {
            current = match self.child_named(current, name) {
                Some(child) => child,
                None => {
                    let id = self.add_child(current, Node::autogenerated(name));
                    info!("Implicitly creating branch '{}'", self.fqn(id));
                    id
                }
            };
        }
        Some(current)
    }

    // =========================================================================
    // TRAVERSAL
    // =========================================================================

    /// Pre-order node ids of the subtree rooted at `id`
    pub fn preorder_from(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn preorder(&self) -> Vec<NodeId> {
        self.preorder_from(self.root)
    }

    pub fn size(&self, id: NodeId) -> usize {
        self.preorder_from(id).len()
    }

    /// Longest downward path in edges; a leaf has height 0
    pub fn height(&self, id: NodeId) -> usize {
        self.children(id)
            .iter()
            .map(|c| self.height(*c) + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.size(self.root)
    }

    // =========================================================================
    // SUBTREE COPIES
    // =========================================================================

    /// Deep-copy the subtree at `src` and append the copy under `parent`
    pub fn copy_subtree(&mut self, src: NodeId, parent: NodeId) -> NodeId {
        let node = self.node(src).detached_clone();
        let copy = self.arena.alloc(node);
        self.arena.attach(parent, copy);
        for child in self.children(src).to_vec() {
            self.copy_subtree(child, copy);
        }
        copy
    }

    /// Deep-copy a subtree of another tree under `parent`
    pub fn import_subtree(&mut self, other: &Tree, src: NodeId, parent: NodeId) -> NodeId {
        let copy = self.arena.alloc(other.node(src).detached_clone());
        self.arena.attach(parent, copy);
        for child in other.children(src) {
            self.import_subtree(other, *child, copy);
        }
        copy
    }

    /// Move `first` to the front of `parent`'s children in the given order;
    /// the remaining children keep their relative order.
    pub fn reorder_children(&mut self, parent: NodeId, first: &[NodeId]) {
        let node = self.arena.get_mut(parent);
        let mut ordered: Vec<NodeId> = first
            .iter()
            .copied()
            .filter(|id| node.children.contains(id))
            .collect();
        ordered.extend(node.children.iter().copied().filter(|id| !first.contains(id)));
        node.children = ordered;
    }

    // =========================================================================
    // WHOLE-TREE PASSES
    // =========================================================================

    /// Assign name-based v5 uuids to every node
    pub fn add_uuids(&mut self) {
        let namespace = Uuid::new_v5(&Uuid::NAMESPACE_OID, UUID_SEED.as_bytes());
        for id in self.preorder() {
            let fqn = self.fqn(id);
            let uuid = Uuid::new_v5(&namespace, fqn.as_bytes());
            self.node_mut(id).uuid = Some(uuid.simple().to_string());
        }
    }

    /// Detach every node flagged `delete` along with its subtree.
    /// Returns the number of nodes removed.
    pub fn remove_delete_nodes(&mut self) -> usize {
        let size_before = self.node_count();
        let marked: Vec<NodeId> = self
            .preorder()
            .into_iter()
            .filter(|id| *id != self.root && self.node(*id).data.common.delete)
            .collect();
        for id in &marked {
            debug!("Deleting node: {}", self.fqn(*id));
            self.detach(*id);
        }
        let removed = size_before - self.node_count();
        if !marked.is_empty() {
            info!(
                "Nodes deleted, marked={}, overall={}",
                marked.len(),
                removed
            );
        }
        removed
    }

    /// Pre-order fqn -> payload mapping, with `uuid` when assigned
    pub fn as_flat_dict(&self, with_extra_attributes: bool) -> Mapping {
        let mut out = Mapping::new();
        for id in self.preorder() {
            let node = self.node(id);
            let mut entry = node.data.as_dict(with_extra_attributes);
            if let Some(uuid) = &node.uuid {
                entry.insert(Value::String("uuid".into()), Value::String(uuid.clone()));
            }
            out.insert(Value::String(self.fqn(id)), Value::Mapping(entry));
        }
        out
    }

    /// Indented outline, one node per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(self.root, 0, &mut out);
        out
    }

    fn render_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        out.push_str(&"  ".repeat(depth));
        out.push_str(&node.name);
        out.push_str(" (");
        out.push_str(node.data.kind().as_str());
        if let Some(datatype) = node.data.datatype() {
            out.push_str(": ");
            out.push_str(datatype);
        }
        out.push_str(")\n");
        for child in self.children(id) {
            self.render_into(*child, depth + 1, out);
        }
    }
}
