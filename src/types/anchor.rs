//! Anchor and link records.

use serde::{Deserialize, Serialize};

use super::extent::Extent;
use super::ids::{AnchorId, LinkId, NodeId};

/// A named sub-region of a node's content that can be linked.
///
/// Identity is stable across extent edits: a moved region updates the
/// extent of the same anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    /// Unique anchor identifier.
    pub anchor_id: AnchorId,
    /// Owning node.
    pub node_id: NodeId,
    /// Region within the node; `None` anchors the whole node.
    pub extent: Option<Extent>,
}

impl Anchor {
    /// Create an anchor.
    pub fn new(anchor_id: AnchorId, node_id: NodeId, extent: Option<Extent>) -> Self {
        Self {
            anchor_id,
            node_id,
            extent,
        }
    }
}

/// An undirected association between two anchors.
///
/// Stored with two explicit slots; slot order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// Unique link identifier.
    pub link_id: LinkId,
    /// First endpoint.
    pub anchor1_id: AnchorId,
    /// Second endpoint.
    pub anchor2_id: AnchorId,
    /// Node owning the first endpoint.
    pub anchor1_node_id: NodeId,
    /// Node owning the second endpoint.
    pub anchor2_node_id: NodeId,
}

impl Link {
    /// Create a link between two anchors.
    pub fn new(link_id: LinkId, anchor1: &Anchor, anchor2: &Anchor) -> Self {
        Self {
            link_id,
            anchor1_id: anchor1.anchor_id.clone(),
            anchor2_id: anchor2.anchor_id.clone(),
            anchor1_node_id: anchor1.node_id.clone(),
            anchor2_node_id: anchor2.node_id.clone(),
        }
    }

    /// Whether `anchor_id` is one of the endpoints.
    pub fn touches(&self, anchor_id: &AnchorId) -> bool {
        &self.anchor1_id == anchor_id || &self.anchor2_id == anchor_id
    }

    /// The endpoint opposite `anchor_id`.
    ///
    /// For a self-link both endpoints are the same anchor; if `anchor_id` is
    /// not an endpoint the first slot is returned.
    pub fn other_anchor(&self, anchor_id: &AnchorId) -> &AnchorId {
        if &self.anchor1_id == anchor_id {
            &self.anchor2_id
        } else {
            &self.anchor1_id
        }
    }

    /// Node owning the endpoint opposite `anchor_id`.
    pub fn other_node(&self, anchor_id: &AnchorId) -> &NodeId {
        if &self.anchor1_id == anchor_id {
            &self.anchor2_node_id
        } else {
            &self.anchor1_node_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(id: &str, node: &str) -> Anchor {
        Anchor::new(AnchorId::new(id), NodeId::new(node), None)
    }

    #[test]
    fn test_other_endpoint_is_symmetric() {
        let a = anchor("anchor.a", "node.1");
        let b = anchor("anchor.b", "node.2");
        let link = Link::new(LinkId::new("link.1"), &a, &b);

        assert_eq!(link.other_anchor(&a.anchor_id), &b.anchor_id);
        assert_eq!(link.other_anchor(&b.anchor_id), &a.anchor_id);
        assert_eq!(link.other_node(&a.anchor_id), &b.node_id);
        assert_eq!(link.other_node(&b.anchor_id), &a.node_id);
        assert!(link.touches(&a.anchor_id));
        assert!(!link.touches(&AnchorId::new("anchor.c")));
    }

    #[test]
    fn test_self_link_other_is_self() {
        let a = anchor("anchor.a", "node.1");
        let link = Link::new(LinkId::new("link.1"), &a, &a);
        assert_eq!(link.other_anchor(&a.anchor_id), &a.anchor_id);
    }
}
