//! Creating and following links.
//!
//! Editors connect two selections by creating an anchor on each side and a
//! link between them, and navigate by following an anchor's link to the
//! other end. [`Linker::anchor_marks`] gives a text editor what it needs to
//! restore its link markup when a node is opened.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::{HypertextStore, StoreError};
use crate::types::{
    validate_extent, Anchor, AnchorId, Extent, ExtentError, Link, Node, NodeId, NodeType,
};

/// Error type for linking operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkerError {
    /// A node to anchor on does not exist.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),
    /// The anchor to follow does not exist.
    #[error("Anchor not found: {0}")]
    AnchorNotFound(AnchorId),
    /// The extent kind cannot live on the node.
    #[error("{kind} extent does not fit {node_type} node {node_id}")]
    ExtentMismatch {
        /// Target node.
        node_id: NodeId,
        /// The node's type.
        node_type: NodeType,
        /// Offending extent kind.
        kind: &'static str,
    },
    /// An extent violates its invariant.
    #[error("Invalid extent: {0}")]
    InvalidExtent(#[from] ExtentError),
    /// Store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// A text anchor as the editor marks it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorMarkup {
    /// Anchor to mark.
    pub anchor_id: AnchorId,
    /// First marked character.
    pub start: usize,
    /// One past the last marked character.
    pub end: usize,
    /// Node on the other end of the anchor's first link.
    pub target_node_id: NodeId,
}

/// Link creation and navigation over a store.
pub struct Linker<S: HypertextStore> {
    store: Arc<S>,
}

impl<S: HypertextStore + 'static> Linker<S> {
    /// Create a linker over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Anchor both selections and link them.
    ///
    /// Extents are checked against their nodes before anything is written.
    /// If a later step fails, anchors this call created are deleted again.
    pub async fn connect(
        &self,
        node1: &NodeId,
        extent1: Option<Extent>,
        node2: &NodeId,
        extent2: Option<Extent>,
    ) -> Result<Link, LinkerError> {
        self.check_target(node1, extent1.as_ref()).await?;
        self.check_target(node2, extent2.as_ref()).await?;

        let anchor1 = self.store.create_anchor(node1, extent1).await?;
        let anchor2 = match self.store.create_anchor(node2, extent2).await {
            Ok(anchor) => anchor,
            Err(e) => {
                self.rollback(&[&anchor1]).await;
                return Err(e.into());
            }
        };

        match self
            .store
            .create_link(&anchor1.anchor_id, &anchor2.anchor_id)
            .await
        {
            Ok(link) => {
                tracing::info!(
                    link_id = %link.link_id,
                    anchor1 = %link.anchor1_id,
                    anchor2 = %link.anchor2_id,
                    "Created link"
                );
                Ok(link)
            }
            Err(e) => {
                self.rollback(&[&anchor1, &anchor2]).await;
                Err(e.into())
            }
        }
    }

    /// Follow an anchor's first link and return the anchor at the other end.
    ///
    /// `Ok(None)` when the anchor has no links or the other end is gone.
    pub async fn follow(&self, anchor_id: &AnchorId) -> Result<Option<Anchor>, LinkerError> {
        if self.store.get_anchor(anchor_id).await?.is_none() {
            return Err(LinkerError::AnchorNotFound(anchor_id.clone()));
        }
        let links = self.store.links_by_anchor(anchor_id).await?;
        let Some(link) = links.first() else {
            return Ok(None);
        };
        Ok(self.store.get_anchor(link.other_anchor(anchor_id)).await?)
    }

    /// Markup for every linked text anchor on a node, ordered by start.
    pub async fn anchor_marks(&self, node_id: &NodeId) -> Result<Vec<AnchorMarkup>, LinkerError> {
        let anchors = self.store.anchors_by_node(node_id).await?;
        let text_anchors: Vec<_> = anchors
            .into_iter()
            .filter_map(|a| match a.extent {
                Some(Extent::Text(text)) => Some((a.anchor_id, text)),
                _ => None,
            })
            .collect();

        let link_lists = join_all(
            text_anchors
                .iter()
                .map(|(anchor_id, _)| self.store.links_by_anchor(anchor_id)),
        )
        .await;

        let mut marks = Vec::with_capacity(text_anchors.len());
        for ((anchor_id, text), links) in text_anchors.into_iter().zip(link_lists) {
            let links = links?;
            let Some(link) = links.first() else {
                tracing::debug!(anchor_id = %anchor_id, "Text anchor has no links, not marked");
                continue;
            };
            marks.push(AnchorMarkup {
                target_node_id: link.other_node(&anchor_id).clone(),
                start: text.start_character,
                end: text.end_character,
                anchor_id,
            });
        }
        marks.sort_by(|a, b| (a.start, &a.anchor_id).cmp(&(b.start, &b.anchor_id)));
        Ok(marks)
    }

    async fn check_target(&self, node_id: &NodeId, extent: Option<&Extent>) -> Result<Node, LinkerError> {
        validate_extent(extent)?;
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or_else(|| LinkerError::NodeNotFound(node_id.clone()))?;
        if let Some(extent) = extent {
            if !extent.fits(node.node_type) {
                return Err(LinkerError::ExtentMismatch {
                    node_id: node_id.clone(),
                    node_type: node.node_type,
                    kind: extent.kind(),
                });
            }
        }
        Ok(node)
    }

    async fn rollback(&self, created: &[&Anchor]) {
        for anchor in created {
            if let Err(e) = self.store.delete_anchor(&anchor.anchor_id).await {
                tracing::warn!(
                    anchor_id = %anchor.anchor_id,
                    error = %e,
                    "Rollback of created anchor failed"
                );
            }
        }
    }
}
