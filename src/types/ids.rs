//! Identifier types for nodes, anchors and links.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Marker that distinguishes anchor references from ordinary hyperlinks
/// in annotated content.
pub const ANCHOR_ID_MARKER: &str = "anchor";

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix used for freshly generated ids.
            pub const PREFIX: &'static str = $prefix;

            /// Wrap an existing id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh, globally unique id.
            pub fn generate() -> Self {
                Self(format!("{}.{}", Self::PREFIX, Uuid::new_v4().simple()))
            }

            /// Get the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a node.
    NodeId,
    "node"
);

string_id!(
    /// Unique identifier for an anchor.
    AnchorId,
    "anchor"
);

string_id!(
    /// Unique identifier for a link.
    LinkId,
    "link"
);

impl AnchorId {
    /// Whether a raw annotation target refers to an anchor at all.
    ///
    /// Content hyperlinks share the same markup as anchor references; only
    /// targets carrying the anchor marker are treated as anchors.
    pub fn is_anchor_reference(target: &str) -> bool {
        target.contains(ANCHOR_ID_MARKER)
    }
}
