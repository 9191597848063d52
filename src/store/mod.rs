//! Storage adapters for nodes, anchors and links.
//!
//! The stores are the system of record. The reconciler and projector hold no
//! state of their own and recompute from these traits on every call.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use std::fmt;

use crate::types::{Anchor, AnchorId, Extent, ExtentError, Link, LinkId, Node, NodeId};

/// Kind of record a store operation addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// A node.
    Node,
    /// An anchor.
    Anchor,
    /// A link.
    Link,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "Node"),
            Self::Anchor => write!(f, "Anchor"),
            Self::Link => write!(f, "Link"),
        }
    }
}

/// Error type shared by all store adapters.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Transport or backend failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// The addressed record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing record.
        kind: RecordKind,
        /// Id of the missing record.
        id: String,
    },
    /// A record references another record that does not exist.
    #[error("Reference inconsistency: {0}")]
    ReferenceInconsistency(String),
    /// An extent handed to the store violates its invariant.
    #[error("Invalid extent: {0}")]
    InvalidExtent(#[from] ExtentError),
}

impl StoreError {
    /// Create an unavailable error from any error type.
    pub fn unavailable<E: std::error::Error>(e: E) -> Self {
        Self::Unavailable(e.to_string())
    }

    /// Create a not-found error.
    pub fn not_found(kind: RecordKind, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Read access to nodes.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch a node by ID.
    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>, StoreError>;
}

/// Anchor persistence.
///
/// `anchors_by_node` results are ordered by `AnchorId`.
#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Fetch all anchors owned by a node.
    async fn anchors_by_node(&self, node_id: &NodeId) -> Result<Vec<Anchor>, StoreError>;

    /// Fetch a single anchor.
    async fn get_anchor(&self, id: &AnchorId) -> Result<Option<Anchor>, StoreError>;

    /// Create an anchor on a node.
    async fn create_anchor(
        &self,
        node_id: &NodeId,
        extent: Option<Extent>,
    ) -> Result<Anchor, StoreError>;

    /// Replace an anchor's extent in place.
    async fn update_extent(&self, id: &AnchorId, extent: Option<Extent>) -> Result<(), StoreError>;

    /// Delete an anchor. Does not touch links.
    async fn delete_anchor(&self, id: &AnchorId) -> Result<(), StoreError>;
}

/// Link persistence.
///
/// `links_by_anchor` results are ordered by `LinkId`.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Fetch all links with `anchor_id` as either endpoint.
    async fn links_by_anchor(&self, anchor_id: &AnchorId) -> Result<Vec<Link>, StoreError>;

    /// Create a link between two existing anchors.
    async fn create_link(&self, anchor1: &AnchorId, anchor2: &AnchorId) -> Result<Link, StoreError>;

    /// Delete a link.
    async fn delete_link(&self, id: &LinkId) -> Result<(), StoreError>;
}

/// A backend serving all three record kinds.
pub trait HypertextStore: NodeStore + AnchorStore + LinkStore {}

impl<T: NodeStore + AnchorStore + LinkStore + ?Sized> HypertextStore for T {}

pub use memory::{InMemoryHypertextStore, StoreOp};

#[cfg(feature = "postgres")]
pub use postgres::PostgresHypertextStore;
