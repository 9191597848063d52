//! Link-graph projection around a focal node.
//!
//! The projector walks exactly one link hop out from the focal node and
//! lays the discovered nodes out for visualization.
//!
//! ## Algorithm
//!
//! 1. Place the focal node at the configured center
//! 2. Fetch the focal node's anchors (failure yields the focal node alone)
//! 3. Fetch every anchor's links concurrently; a failed fetch drops only
//!    that anchor's links
//! 4. For each link, in anchor order then link order:
//!    - resolve both endpoint anchors; if both resolve, emit the edge
//!    - fetch unseen endpoint nodes and add them with the next pool position
//! 5. Return the accumulated projection
//!
//! Fetch failures past step 2 are logged and omit only the affected edge
//! or node. Node and edge identity is tracked by id, so nothing is added
//! twice.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use crate::layout::{LayoutConfig, PositionPool};
use crate::store::{HypertextStore, StoreError};
use crate::types::{Anchor, AnchorId, GraphEdge, GraphNode, Link, LinkId, Node, NodeId, Projection};

/// Error type for projection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    /// The focal node does not exist.
    #[error("Focal node not found: {0}")]
    FocalNodeNotFound(NodeId),
    /// The focal node could not be fetched.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Builds the one-hop link graph around a focal node.
pub struct LinkGraphProjector<S: HypertextStore> {
    store: Arc<S>,
    config: LayoutConfig,
}

impl<S: HypertextStore + 'static> LinkGraphProjector<S> {
    /// Create a projector with a layout configuration.
    pub fn new(store: Arc<S>, config: LayoutConfig) -> Self {
        Self { store, config }
    }

    /// Get the layout configuration.
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve the focal node by id, then project around it.
    pub async fn project_by_id(&self, focal_id: &NodeId) -> Result<Projection, ProjectionError> {
        let focal = self
            .store
            .get_node(focal_id)
            .await?
            .ok_or_else(|| ProjectionError::FocalNodeNotFound(focal_id.clone()))?;
        Ok(self.project(&focal).await)
    }

    /// Project the graph around `focal`. Never fails; unresolved parts of
    /// the neighborhood are left out.
    pub async fn project(&self, focal: &Node) -> Projection {
        let mut walk = Walk::new(focal, &self.config);

        let anchors = match self.store.anchors_by_node(&focal.node_id).await {
            Ok(anchors) => anchors,
            Err(e) => {
                tracing::warn!(
                    node_id = %focal.node_id,
                    error = %e,
                    "Focal anchor fetch failed, projecting focal node only"
                );
                return walk.finish();
            }
        };

        let link_lists = join_all(
            anchors
                .iter()
                .map(|anchor| self.store.links_by_anchor(&anchor.anchor_id)),
        )
        .await;

        for (anchor, links) in anchors.iter().zip(link_lists) {
            let links = match links {
                Ok(links) => links,
                Err(e) => {
                    tracing::warn!(
                        anchor_id = %anchor.anchor_id,
                        error = %e,
                        "Link fetch failed, anchor contributes no edges"
                    );
                    continue;
                }
            };

            for link in links {
                if walk.has_edge(&link.link_id) {
                    continue;
                }
                self.follow_link(&mut walk, link).await;
            }
        }

        let projection = walk.finish();
        tracing::info!(
            node_id = %focal.node_id,
            nodes = projection.num_nodes(),
            edges = projection.num_edges(),
            "Projected link graph"
        );
        projection
    }

    /// Resolve one link's endpoint anchors and emit its edge; endpoint nodes
    /// that fail to resolve are left out of the node set.
    async fn follow_link(&self, walk: &mut Walk, link: Link) {
        let (Some(anchor1), Some(anchor2)) = (
            self.resolve_anchor(&link.anchor1_id).await,
            self.resolve_anchor(&link.anchor2_id).await,
        ) else {
            tracing::debug!(link_id = %link.link_id, "Link endpoint unresolved, skipping edge");
            return;
        };

        walk.add_edge(GraphEdge {
            id: link.link_id.clone(),
            source: anchor1.node_id.clone(),
            target: anchor2.node_id.clone(),
        });

        for node_id in [&anchor1.node_id, &anchor2.node_id] {
            if walk.has_node(node_id) {
                continue;
            }
            match self.resolve_node(node_id).await {
                Some(node) => walk.add_node(node),
                None => tracing::debug!(
                    link_id = %link.link_id,
                    node_id = %node_id,
                    "Endpoint node unresolved, omitting node"
                ),
            }
        }
    }

    async fn resolve_anchor(&self, id: &AnchorId) -> Option<Anchor> {
        match self.store.get_anchor(id).await {
            Ok(anchor) => anchor,
            Err(e) => {
                tracing::warn!(anchor_id = %id, error = %e, "Anchor fetch failed");
                None
            }
        }
    }

    async fn resolve_node(&self, id: &NodeId) -> Option<Node> {
        match self.store.get_node(id).await {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!(node_id = %id, error = %e, "Node fetch failed");
                None
            }
        }
    }
}

/// Accumulated state of one projection call.
struct Walk {
    focal: NodeId,
    pool: PositionPool,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    node_ids: HashSet<NodeId>,
    edge_ids: HashSet<LinkId>,
}

impl Walk {
    fn new(focal: &Node, config: &LayoutConfig) -> Self {
        let mut walk = Self {
            focal: focal.node_id.clone(),
            pool: PositionPool::new(config.clone()),
            nodes: Vec::new(),
            edges: Vec::new(),
            node_ids: HashSet::new(),
            edge_ids: HashSet::new(),
        };
        walk.node_ids.insert(focal.node_id.clone());
        walk.nodes.push(GraphNode {
            id: focal.node_id.clone(),
            label: focal.title.clone(),
            position: config.center,
        });
        walk
    }

    fn has_node(&self, id: &NodeId) -> bool {
        self.node_ids.contains(id)
    }

    fn has_edge(&self, id: &LinkId) -> bool {
        self.edge_ids.contains(id)
    }

    fn add_node(&mut self, node: Node) {
        if !self.node_ids.insert(node.node_id.clone()) {
            return;
        }
        let position = self.pool.next_position();
        self.nodes.push(GraphNode {
            id: node.node_id,
            label: node.title,
            position,
        });
    }

    fn add_edge(&mut self, edge: GraphEdge) {
        if self.edge_ids.insert(edge.id.clone()) {
            self.edges.push(edge);
        }
    }

    fn finish(self) -> Projection {
        Projection {
            focal: self.focal,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::generate_positions;
    use crate::store::{InMemoryHypertextStore, StoreOp};
    use crate::types::{Extent, NodeType, Position};

    fn node(id: &str) -> Node {
        Node::new(NodeId::new(id), NodeType::Text, id.to_uppercase(), "")
    }

    fn anchor(id: &str, node: &str) -> Anchor {
        Anchor::new(AnchorId::new(id), NodeId::new(node), Some(Extent::text("x", 0)))
    }

    fn connect(store: &mut InMemoryHypertextStore, link_id: &str, a: &Anchor, b: &Anchor) {
        store.add_link(Link::new(LinkId::new(link_id), a, b));
    }

    /// n0 --L1--> n1, n0 --L2--> n2
    fn example_store() -> InMemoryHypertextStore {
        let mut store = InMemoryHypertextStore::new();
        for id in ["n0", "n1", "n2"] {
            store.add_node(node(id));
        }
        let a0a = anchor("anchor.0a", "n0");
        let a0b = anchor("anchor.0b", "n0");
        let a1 = anchor("anchor.1", "n1");
        let a2 = anchor("anchor.2", "n2");
        connect(&mut store, "link.1", &a0a, &a1);
        connect(&mut store, "link.2", &a0b, &a2);
        for a in [a0a, a0b, a1, a2] {
            store.add_anchor(a);
        }
        store
    }

    fn projector(store: InMemoryHypertextStore) -> LinkGraphProjector<InMemoryHypertextStore> {
        LinkGraphProjector::new(Arc::new(store), LayoutConfig::with_seed(7))
    }

    #[tokio::test]
    async fn test_example_projection() {
        let projector = projector(example_store());
        let projection = projector.project(&node("n0")).await;

        let ids: Vec<&str> = projection.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n0", "n1", "n2"]);
        assert_eq!(projection.nodes[0].position, Position::new(250, 25));

        let expected = generate_positions(2, projector.config());
        assert_eq!(projection.nodes[1].position, expected[0]);
        assert_eq!(projection.nodes[2].position, expected[1]);

        let l1 = projection.edge(&LinkId::new("link.1")).unwrap();
        assert_eq!((l1.source.as_str(), l1.target.as_str()), ("n0", "n1"));
        let l2 = projection.edge(&LinkId::new("link.2")).unwrap();
        assert_eq!((l2.source.as_str(), l2.target.as_str()), ("n0", "n2"));
        assert_eq!(projection.num_edges(), 2);
        assert_eq!(projection.nodes[1].label, "N1");
    }

    #[tokio::test]
    async fn test_two_links_to_same_node_dedup() {
        let mut store = InMemoryHypertextStore::new();
        store.add_node(node("n0"));
        store.add_node(node("n1"));
        let a = anchor("anchor.a", "n0");
        let b = anchor("anchor.b", "n0");
        let c = anchor("anchor.c", "n1");
        let d = anchor("anchor.d", "n1");
        connect(&mut store, "link.ac", &a, &c);
        connect(&mut store, "link.bd", &b, &d);
        for x in [a, b, c, d] {
            store.add_anchor(x);
        }

        let projection = projector(store).project(&node("n0")).await;
        assert_eq!(projection.num_nodes(), 2);
        assert_eq!(projection.num_edges(), 2);
    }

    #[tokio::test]
    async fn test_link_between_focal_anchors_appears_once() {
        let mut store = InMemoryHypertextStore::new();
        store.add_node(node("n0"));
        let a = anchor("anchor.a", "n0");
        let b = anchor("anchor.b", "n0");
        connect(&mut store, "link.ab", &a, &b);
        store.add_anchor(a);
        store.add_anchor(b);

        let projection = projector(store).project(&node("n0")).await;
        assert_eq!(projection.num_nodes(), 1);
        assert_eq!(projection.num_edges(), 1);
    }

    #[tokio::test]
    async fn test_projection_is_deterministic() {
        let store = Arc::new(example_store());
        let p1 = LinkGraphProjector::new(Arc::clone(&store), LayoutConfig::with_seed(3));
        let p2 = LinkGraphProjector::new(Arc::clone(&store), LayoutConfig::with_seed(3));

        let a = p1.project(&node("n0")).await;
        let b = p2.project(&node("n0")).await;
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[tokio::test]
    async fn test_focal_anchor_failure_degrades_to_focal_only() {
        let store = example_store();
        store.fail_on(StoreOp::AnchorsByNode);
        let projection = projector(store).project(&node("n0")).await;

        assert_eq!(projection.num_nodes(), 1);
        assert_eq!(projection.num_edges(), 0);
    }

    #[tokio::test]
    async fn test_one_anchor_link_failure_keeps_others() {
        let store = example_store();
        store.fail_on_id(StoreOp::LinksByAnchor, "anchor.0a");
        let projection = projector(store).project(&node("n0")).await;

        assert!(projection.node(&NodeId::new("n1")).is_none());
        assert!(projection.node(&NodeId::new("n2")).is_some());
        assert_eq!(projection.num_edges(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_node_keeps_edge() {
        let store = example_store();
        store.fail_on_id(StoreOp::GetNode, "n1");
        let projection = projector(store).project(&node("n0")).await;

        assert!(projection.edge(&LinkId::new("link.1")).is_some());
        assert!(projection.edge(&LinkId::new("link.2")).is_some());
        assert!(projection.node(&NodeId::new("n1")).is_none());
        assert_eq!(projection.num_nodes(), 2);
    }

    #[tokio::test]
    async fn test_single_link_with_unresolved_neighbor() {
        let mut store = InMemoryHypertextStore::new();
        store.add_node(node("n0"));
        store.add_node(node("n1"));
        let a = anchor("anchor.a", "n0");
        let b = anchor("anchor.b", "n1");
        connect(&mut store, "link.ab", &a, &b);
        store.add_anchor(a);
        store.add_anchor(b);
        store.fail_on_id(StoreOp::GetNode, "n1");

        let projection = projector(store).project(&node("n0")).await;
        assert_eq!(projection.num_edges(), 1);
        assert_eq!(projection.num_nodes(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_anchor_omits_edge() {
        let store = example_store();
        store.fail_on_id(StoreOp::GetAnchor, "anchor.2");
        let projection = projector(store).project(&node("n0")).await;

        assert_eq!(projection.num_edges(), 1);
        assert!(projection.node(&NodeId::new("n2")).is_none());
    }

    #[tokio::test]
    async fn test_pool_grows_past_default_capacity() {
        let mut store = InMemoryHypertextStore::new();
        store.add_node(node("n0"));
        let mut anchors = Vec::new();
        for i in 0..25 {
            let neighbor = format!("m{:02}", i);
            store.add_node(node(&neighbor));
            let local = anchor(&format!("anchor.l{:02}", i), "n0");
            let remote = anchor(&format!("anchor.r{:02}", i), &neighbor);
            connect(&mut store, &format!("link.{:02}", i), &local, &remote);
            anchors.push(local);
            anchors.push(remote);
        }
        for a in anchors {
            store.add_anchor(a);
        }

        let projection = projector(store).project(&node("n0")).await;
        assert_eq!(projection.num_nodes(), 26);
        assert_eq!(projection.num_edges(), 25);

        let positions: HashSet<_> = projection.nodes.iter().map(|n| n.position).collect();
        assert_eq!(positions.len(), 26);
    }

    #[tokio::test]
    async fn test_project_by_id() {
        let projector = projector(example_store());
        let projection = projector.project_by_id(&NodeId::new("n0")).await.unwrap();
        assert_eq!(projection.focal, NodeId::new("n0"));

        let err = projector.project_by_id(&NodeId::new("missing")).await.unwrap_err();
        assert_eq!(err, ProjectionError::FocalNodeNotFound(NodeId::new("missing")));
    }

    #[tokio::test]
    async fn test_project_by_id_store_failure() {
        let store = example_store();
        store.fail_on(StoreOp::GetNode);
        let err = projector(store).project_by_id(&NodeId::new("n0")).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Store(StoreError::Unavailable(_))));
    }
}
