//! Node types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::NodeId;

/// Kind of content a node holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Rich text.
    Text,
    /// Raster image.
    Image,
    /// Container of other nodes.
    Folder,
    /// PDF document.
    Pdf,
    /// Audio or video.
    Temporal,
}

impl NodeType {
    /// Parse node type from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "folder" => Some(Self::Folder),
            "pdf" => Some(Self::Pdf),
            "temporal" => Some(Self::Temporal),
            _ => None,
        }
    }
}

impl Default for NodeType {
    fn default() -> Self {
        Self::Text
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Folder => write!(f, "folder"),
            Self::Pdf => write!(f, "pdf"),
            Self::Temporal => write!(f, "temporal"),
        }
    }
}

/// A hypermedia node.
///
/// Only the fields the kernel reads are modelled; presentation metadata
/// (canvas position, image sizes) stays with the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node identifier.
    pub node_id: NodeId,
    /// User-visible title.
    pub title: String,
    /// Content kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Raw content (HTML for text nodes, a URL for media nodes).
    pub content: String,
    /// Creation time, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<DateTime<Utc>>,
}

impl Node {
    /// Create a node. An empty title falls back to `node<id>`.
    pub fn new(
        node_id: NodeId,
        node_type: NodeType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut title = title.into();
        if title.is_empty() {
            title = format!("node{}", node_id);
        }
        Self {
            node_id,
            title,
            node_type,
            content: content.into(),
            date_created: None,
        }
    }

    /// Set the creation time.
    pub fn with_date_created(mut self, date_created: DateTime<Utc>) -> Self {
        self.date_created = Some(date_created);
        self
    }
}
