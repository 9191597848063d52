//! Projection types: the derived node/edge graph built for visualization.
//!
//! Nothing here is persisted; a projection is recomputed from the stores on
//! every focal-node change.

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;
use super::ids::{LinkId, NodeId};

/// A layout coordinate in visualization space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: i32,
    /// Vertical coordinate.
    pub y: i32,
}

impl Position {
    /// Create a position.
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One node discovered during traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// The underlying node id.
    pub id: NodeId,
    /// Display label (the node title).
    pub label: String,
    /// Assigned layout position.
    pub position: Position,
}

/// One link whose two endpoints both resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// The underlying link id.
    pub id: LinkId,
    /// Node owning the link's first anchor.
    pub source: NodeId,
    /// Node owning the link's second anchor.
    pub target: NodeId,
}

/// The projected graph around a focal node.
///
/// Nodes are in discovery order with the focal node first; edges are in
/// link traversal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    /// The node the projection is rooted at.
    pub focal: NodeId,
    /// Distinct nodes, focal first.
    pub nodes: Vec<GraphNode>,
    /// Distinct edges.
    pub edges: Vec<GraphEdge>,
}

impl Projection {
    /// Look up a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Look up an edge by link id.
    pub fn edge(&self, id: &LinkId) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| &e.id == id)
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Canonical hash over nodes, positions and edges.
    ///
    /// Two projections with the same fingerprint render identically.
    pub fn fingerprint(&self) -> String {
        canonical_hash_hex(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(x: i32) -> Projection {
        Projection {
            focal: NodeId::new("n0"),
            nodes: vec![GraphNode {
                id: NodeId::new("n0"),
                label: "Root".to_string(),
                position: Position::new(x, 25),
            }],
            edges: vec![],
        }
    }

    #[test]
    fn test_fingerprint_tracks_positions() {
        assert_eq!(projection(250).fingerprint(), projection(250).fingerprint());
        assert_ne!(projection(250).fingerprint(), projection(300).fingerprint());
    }

    #[test]
    fn test_lookup() {
        let p = projection(250);
        assert!(p.node(&NodeId::new("n0")).is_some());
        assert!(p.node(&NodeId::new("n1")).is_none());
        assert!(p.edge(&LinkId::new("l1")).is_none());
    }
}
