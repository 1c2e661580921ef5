//! Node registry
//!
//! Nodes are plain arena handles. Everything a node "is" (its devices,
//! addresses, mobility, bearers) lives in side tables owned by the component
//! that put it there, keyed by `NodeId`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} has no IP stack installed")]
    MissingStack(NodeId),
}

/// Opaque node handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Role tag given at creation; only used for naming, reporting and
/// the setup checks on flows touching mobile or gateway-routed nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Peer,
    Gateway,
    RemoteHost,
    MobileStation,
    BaseStation,
}

impl NodeRole {
    fn prefix(self) -> &'static str {
        match self {
            NodeRole::Peer => "peer",
            NodeRole::Gateway => "gw",
            NodeRole::RemoteHost => "remote",
            NodeRole::MobileStation => "ms",
            NodeRole::BaseStation => "bs",
        }
    }
}

/// Ordered collection of node handles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet(Vec<NodeId>);

impl NodeSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn single(node: NodeId) -> Self {
        Self(vec![node])
    }

    pub fn add(&mut self, node: NodeId) {
        self.0.push(node);
    }

    /// Concatenation preserving order, `self` first
    pub fn join(&self, other: &NodeSet) -> NodeSet {
        let mut nodes = self.0.clone();
        nodes.extend(other.iter());
        NodeSet(nodes)
    }

    pub fn get(&self, i: usize) -> Option<NodeId> {
        self.0.get(i).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }
}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        NodeSet(iter.into_iter().collect())
    }
}

impl From<NodeId> for NodeSet {
    fn from(node: NodeId) -> Self {
        NodeSet::single(node)
    }
}

#[derive(Debug, Clone)]
struct NodeEntry {
    role: NodeRole,
    name: String,
    stack: bool,
}

/// Arena of every node in a scenario
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Vec<NodeEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `count` nodes with the given role
    pub fn create(&mut self, role: NodeRole, count: usize) -> NodeSet {
        (0..count).map(|_| self.create_one(role)).collect()
    }

    pub fn create_one(&mut self, role: NodeRole) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let ordinal = self.nodes.iter().filter(|n| n.role == role).count();
        let name = format!("{}{}", role.prefix(), ordinal);
        debug!("Created node {} ({})", id, name);
        self.nodes.push(NodeEntry {
            role,
            name,
            stack: false,
        });
        id
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.index() < self.nodes.len()
    }

    pub fn check(&self, node: NodeId) -> Result<(), NodeError> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(NodeError::UnknownNode(node))
        }
    }

    pub fn role(&self, node: NodeId) -> Option<NodeRole> {
        self.nodes.get(node.index()).map(|n| n.role)
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.index()).map(|n| n.name.as_str())
    }

    /// Install the IP-capable protocol stack on every node of the set.
    /// Installing twice is a no-op.
    pub fn install_stack(&mut self, nodes: &NodeSet) -> Result<(), NodeError> {
        for node in nodes.iter() {
            self.check(node)?;
        }
        for node in nodes.iter() {
            let entry = &mut self.nodes[node.index()];
            if !entry.stack {
                debug!("Installed IP stack on {}", entry.name);
                entry.stack = true;
            }
        }
        Ok(())
    }

    pub fn has_stack(&self, node: NodeId) -> bool {
        self.nodes.get(node.index()).is_some_and(|n| n.stack)
    }

    pub fn require_stack(&self, node: NodeId) -> Result<(), NodeError> {
        self.check(node)?;
        if self.has_stack(node) {
            Ok(())
        } else {
            Err(NodeError::MissingStack(node))
        }
    }

    pub fn with_role(&self, role: NodeRole) -> NodeSet {
        self.ids().filter(|id| self.role(*id) == Some(role)).collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_assigns_sequential_ids_and_names() {
        let mut registry = NodeRegistry::new();
        let peers = registry.create(NodeRole::Peer, 3);
        let gw = registry.create_one(NodeRole::Gateway);

        assert_eq!(peers.len(), 3);
        assert_eq!(peers.get(2), Some(NodeId(2)));
        assert_eq!(gw, NodeId(3));
        assert_eq!(registry.name(peers.get(1).unwrap()), Some("peer1"));
        assert_eq!(registry.name(gw), Some("gw0"));
        assert_eq!(registry.with_role(NodeRole::Peer), peers);
    }

    #[test]
    fn test_install_stack_is_idempotent() {
        let mut registry = NodeRegistry::new();
        let nodes = registry.create(NodeRole::Peer, 2);
        assert!(registry.require_stack(nodes.get(0).unwrap()).is_err());

        registry.install_stack(&nodes).unwrap();
        registry.install_stack(&nodes).unwrap();
        assert!(nodes.iter().all(|n| registry.has_stack(n)));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut registry = NodeRegistry::new();
        let foreign = NodeSet::single(NodeId(7));
        assert_eq!(
            registry.install_stack(&foreign),
            Err(NodeError::UnknownNode(NodeId(7)))
        );
    }

    #[test]
    fn test_join_preserves_order() {
        let mut registry = NodeRegistry::new();
        let a = registry.create(NodeRole::Peer, 1);
        let b = registry.create(NodeRole::Peer, 2);
        let joined = b.join(&a);
        assert_eq!(joined.as_slice(), &[NodeId(1), NodeId(2), NodeId(0)]);
    }
}
