//! # anchor-link-kernel
//!
//! Anchor and link consistency for a hypermedia canvas.
//!
//! Nodes hold content (text, images, PDFs, temporal media). Anchors mark a
//! region of one node's content, and links join two anchors. This crate
//! keeps those records consistent as content is edited and derives the
//! navigable graph shown around a focal node.
//!
//! ## Core Contract
//!
//! 1. After an edit, [`AnchorReconciler::reconcile`] rewrites the extents of
//!    anchors the content still references and cascade-deletes the rest,
//!    together with their links and any anchor left linkless
//! 2. [`LinkGraphProjector::project`] builds the one-hop graph around a
//!    focal node with a reproducible layout
//! 3. No link ever points at a missing anchor
//!
//! ## Architecture
//!
//! ```text
//! Edited content → MarkedContent → AnchorReconciler ─┐
//!                                                    ├→ Node / Anchor / Link stores
//! Focal node → LinkGraphProjector → Projection ──────┘   (Postgres or Memory)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same focal node + same store contents + same layout seed → identical projection
//! - Store listings are ordered by id
//! - Reconciling unchanged content performs no writes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod store;
pub mod content;
pub mod reconciler;
pub mod layout;
pub mod projector;
pub mod linking;
pub mod canonical;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    NodeId, AnchorId, LinkId, Node, NodeType, Anchor, Link,
    Extent, ExtentError, TextExtent, ImageExtent, TemporalExtent,
    validate_extent, same_extent,
    Position, GraphNode, GraphEdge, Projection,
};
pub use store::{
    NodeStore, AnchorStore, LinkStore, HypertextStore, StoreError, RecordKind,
    InMemoryHypertextStore, StoreOp,
};
#[cfg(feature = "postgres")]
pub use store::PostgresHypertextStore;
pub use content::{MarkedContent, AnchorMark};
pub use reconciler::{
    AnchorReconciler, ReconcileReport, ReconcileError, OrphanOutcome, OrphanState, CascadeFailure,
};
pub use layout::{LayoutConfig, ConfigError, PositionPool, generate_positions};
pub use projector::{LinkGraphProjector, ProjectionError};
pub use linking::{Linker, LinkerError, AnchorMarkup};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Schema version for all serialized kernel types.
/// Increment on breaking changes to any schema type.
pub const ANCHOR_LINK_SCHEMA_VERSION: &str = "1.0.0";
