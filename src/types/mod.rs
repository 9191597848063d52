//! Core types for the anchor/link kernel.

pub mod ids;
pub mod node;
pub mod extent;
pub mod anchor;
pub mod graph;

pub use ids::{NodeId, AnchorId, LinkId, ANCHOR_ID_MARKER};
pub use node::{Node, NodeType};
pub use extent::{
    Extent, ExtentError, TextExtent, ImageExtent, TemporalExtent,
    validate_extent, same_extent,
};
pub use anchor::{Anchor, Link};
pub use graph::{Position, GraphNode, GraphEdge, Projection};
