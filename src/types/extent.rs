//! Extent types: where an anchor attaches within a node's content.
//!
//! An extent is a closed tagged union with one variant per content kind.
//! An anchor without an extent (`None`) anchors the whole node.
//!
//! ## Wire format
//!
//! ```text
//! {"type":"text","startCharacter":4,"endCharacter":9,"text":"quick"}
//! {"type":"image","left":10,"top":20,"width":30,"height":40}
//! {"type":"temporal","startTimestamp":12.5}
//! null
//! ```

use serde::{Deserialize, Serialize};

use super::node::NodeType;

/// Error raised when an extent violates its invariant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtentError {
    /// Text range runs backwards.
    #[error("Text extent range is inverted: start {start} > end {end}")]
    InvertedTextRange {
        /// Start character offset.
        start: usize,
        /// End character offset.
        end: usize,
    },
    /// Text range does not cover exactly the anchored text.
    #[error("Text extent range {start}..{end} does not match text length {len}")]
    TextLengthMismatch {
        /// Start character offset.
        start: usize,
        /// End character offset.
        end: usize,
        /// Character count of the anchored text.
        len: usize,
    },
    /// Image rectangle has a negative side.
    #[error("Image extent has negative dimensions: {width}x{height}")]
    NegativeDimensions {
        /// Rectangle width.
        width: f64,
        /// Rectangle height.
        height: f64,
    },
    /// Temporal extent points before the start of the media.
    #[error("Temporal extent has negative start timestamp: {0}")]
    NegativeTimestamp(f64),
    /// A numeric field is NaN or infinite.
    #[error("Extent field `{0}` is not a finite number")]
    NonFinite(&'static str),
    /// The value is not shaped like any extent variant.
    #[error("Malformed extent: {0}")]
    Malformed(String),
}

/// Extent of an anchor on a text node.
///
/// Offsets are character (not byte) positions into the node's flattened
/// text content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextExtent {
    /// First anchored character.
    pub start_character: usize,
    /// One past the last anchored character.
    pub end_character: usize,
    /// The anchored text.
    pub text: String,
}

impl TextExtent {
    /// Create a text extent starting at `start`, spanning all of `text`.
    pub fn new(text: impl Into<String>, start: usize) -> Self {
        let text = text.into();
        let end_character = start + text.chars().count();
        Self {
            start_character: start,
            end_character,
            text,
        }
    }

    /// Create a text extent from explicit offsets, checking the invariant.
    pub fn from_parts(
        text: impl Into<String>,
        start: usize,
        end: usize,
    ) -> Result<Self, ExtentError> {
        let extent = Self {
            start_character: start,
            end_character: end,
            text: text.into(),
        };
        extent.validate()?;
        Ok(extent)
    }

    /// Number of anchored characters.
    pub fn len(&self) -> usize {
        self.end_character.saturating_sub(self.start_character)
    }

    /// Whether the extent anchors no characters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check `start <= end` and `end - start == chars(text)`.
    pub fn validate(&self) -> Result<(), ExtentError> {
        let (start, end) = (self.start_character, self.end_character);
        if start > end {
            return Err(ExtentError::InvertedTextRange { start, end });
        }
        let len = self.text.chars().count();
        if end - start != len {
            return Err(ExtentError::TextLengthMismatch { start, end, len });
        }
        Ok(())
    }
}

/// Extent of an anchor on an image node: an axis-aligned rectangle in
/// content-local pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageExtent {
    /// Left edge.
    pub left: f64,
    /// Top edge.
    pub top: f64,
    /// Width (non-negative).
    pub width: f64,
    /// Height (non-negative).
    pub height: f64,
}

impl ImageExtent {
    /// Create an image extent; omitted fields default to the unit rectangle
    /// at the origin.
    pub fn new(
        left: Option<f64>,
        top: Option<f64>,
        width: Option<f64>,
        height: Option<f64>,
    ) -> Self {
        Self {
            left: left.unwrap_or(0.0),
            top: top.unwrap_or(0.0),
            width: width.unwrap_or(1.0),
            height: height.unwrap_or(1.0),
        }
    }

    /// Create a fully specified rectangle.
    pub fn rect(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self::new(Some(left), Some(top), Some(width), Some(height))
    }

    /// Hit test in content-local coordinates (edges inclusive).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left
            && x <= self.left + self.width
            && y >= self.top
            && y <= self.top + self.height
    }

    /// Check finiteness and non-negative dimensions.
    pub fn validate(&self) -> Result<(), ExtentError> {
        for (name, value) in [
            ("left", self.left),
            ("top", self.top),
            ("width", self.width),
            ("height", self.height),
        ] {
            if !value.is_finite() {
                return Err(ExtentError::NonFinite(name));
            }
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err(ExtentError::NegativeDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl Default for ImageExtent {
    fn default() -> Self {
        Self::new(None, None, None, None)
    }
}

/// Extent of an anchor on a temporal (audio/video) node: a single point in
/// playback seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalExtent {
    /// Playback position in seconds.
    pub start_timestamp: f64,
}

impl TemporalExtent {
    /// Create a temporal extent, rejecting negative or non-finite timestamps.
    pub fn new(start_timestamp: f64) -> Result<Self, ExtentError> {
        let extent = Self { start_timestamp };
        extent.validate()?;
        Ok(extent)
    }

    /// Check the timestamp is finite and not negative.
    pub fn validate(&self) -> Result<(), ExtentError> {
        if !self.start_timestamp.is_finite() {
            return Err(ExtentError::NonFinite("startTimestamp"));
        }
        if self.start_timestamp < 0.0 {
            return Err(ExtentError::NegativeTimestamp(self.start_timestamp));
        }
        Ok(())
    }
}

/// Where an anchor attaches within its node's content.
///
/// Equality is structural: same variant, same fields. Reconciliation relies
/// on it to detect no-op updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Extent {
    /// Character span in text content.
    Text(TextExtent),
    /// Rectangle in image content.
    Image(ImageExtent),
    /// Timestamp in temporal media.
    Temporal(TemporalExtent),
}

impl Extent {
    /// Text extent spanning `text` from `start`.
    pub fn text(text: impl Into<String>, start: usize) -> Self {
        Self::Text(TextExtent::new(text, start))
    }

    /// Image extent with documented defaults for omitted fields.
    pub fn image(
        left: Option<f64>,
        top: Option<f64>,
        width: Option<f64>,
        height: Option<f64>,
    ) -> Self {
        Self::Image(ImageExtent::new(left, top, width, height))
    }

    /// Temporal extent at `start_timestamp` seconds.
    pub fn temporal(start_timestamp: f64) -> Result<Self, ExtentError> {
        TemporalExtent::new(start_timestamp).map(Self::Temporal)
    }

    /// Variant name as used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
            Self::Temporal(_) => "temporal",
        }
    }

    /// Check the invariant of the contained variant.
    pub fn validate(&self) -> Result<(), ExtentError> {
        match self {
            Self::Text(e) => e.validate(),
            Self::Image(e) => e.validate(),
            Self::Temporal(e) => e.validate(),
        }
    }

    /// Whether the extent satisfies its invariant.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Whether this extent kind can live on a node of `node_type`.
    pub fn fits(&self, node_type: NodeType) -> bool {
        matches!(
            (self, node_type),
            (Self::Text(_), NodeType::Text)
                | (Self::Image(_), NodeType::Image | NodeType::Pdf)
                | (Self::Temporal(_), NodeType::Temporal)
        )
    }

    /// Parse and validate an untyped JSON value.
    ///
    /// `null` is a valid (whole-node) extent and yields `Ok(None)`.
    pub fn from_json(value: &serde_json::Value) -> Result<Option<Self>, ExtentError> {
        if value.is_null() {
            return Ok(None);
        }
        let extent: Extent = serde_json::from_value(value.clone())
            .map_err(|e| ExtentError::Malformed(e.to_string()))?;
        extent.validate()?;
        Ok(Some(extent))
    }
}

/// Validate an optional extent; `None` is always valid.
pub fn validate_extent(extent: Option<&Extent>) -> Result<(), ExtentError> {
    extent.map_or(Ok(()), Extent::validate)
}

/// Structural equality of two optional extents; `None == None`.
pub fn same_extent(a: Option<&Extent>, b: Option<&Extent>) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_constructor_derives_end() {
        let e = TextExtent::new("quick", 4);
        assert_eq!(e.end_character, 9);
        assert!(e.validate().is_ok());
    }

    #[test]
    fn test_text_counts_characters_not_bytes() {
        let e = TextExtent::new("héllo", 0);
        assert_eq!(e.end_character, 5);
        assert!(TextExtent::from_parts("héllo", 0, 5).is_ok());
    }

    #[test]
    fn test_text_forward_range_is_valid() {
        // start < end must pass; only start > end is rejected
        assert!(TextExtent::from_parts("ab", 1, 3).is_ok());
        assert_eq!(
            TextExtent::from_parts("", 3, 1),
            Err(ExtentError::InvertedTextRange { start: 3, end: 1 })
        );
    }

    #[test]
    fn test_text_length_mismatch() {
        let err = TextExtent::from_parts("abc", 0, 2).unwrap_err();
        assert_eq!(err, ExtentError::TextLengthMismatch { start: 0, end: 2, len: 3 });
    }

    #[test]
    fn test_image_defaults_to_unit_rect_at_origin() {
        let e = ImageExtent::new(None, None, None, None);
        assert_eq!(e, ImageExtent::rect(0.0, 0.0, 1.0, 1.0));
        let partial = ImageExtent::new(Some(5.0), None, Some(10.0), None);
        assert_eq!(partial, ImageExtent::rect(5.0, 0.0, 10.0, 1.0));
    }

    #[test]
    fn test_image_rejects_negative_and_nan() {
        assert!(ImageExtent::rect(0.0, 0.0, -1.0, 2.0).validate().is_err());
        assert_eq!(
            ImageExtent::rect(f64::NAN, 0.0, 1.0, 1.0).validate(),
            Err(ExtentError::NonFinite("left"))
        );
    }

    #[test]
    fn test_image_contains() {
        let e = ImageExtent::rect(10.0, 10.0, 20.0, 5.0);
        assert!(e.contains(10.0, 15.0));
        assert!(e.contains(30.0, 12.0));
        assert!(!e.contains(31.0, 12.0));
    }

    #[test]
    fn test_temporal_rejects_negative() {
        assert!(TemporalExtent::new(0.0).is_ok());
        assert_eq!(
            TemporalExtent::new(-0.5),
            Err(ExtentError::NegativeTimestamp(-0.5))
        );
        assert!(Extent::temporal(f64::INFINITY).is_err());
    }

    #[test]
    fn test_wire_format() {
        let e = Extent::text("fox", 16);
        assert_eq!(
            serde_json::to_value(&e).unwrap(),
            json!({"type": "text", "startCharacter": 16, "endCharacter": 19, "text": "fox"})
        );
        let t = Extent::temporal(3.5).unwrap();
        assert_eq!(
            serde_json::to_value(&t).unwrap(),
            json!({"type": "temporal", "startTimestamp": 3.5})
        );
    }

    #[test]
    fn test_from_json_accepts_null_and_valid_variants() {
        assert_eq!(Extent::from_json(&json!(null)).unwrap(), None);
        let image = Extent::from_json(&json!({
            "type": "image", "left": 1, "top": 2, "width": 3, "height": 4
        }))
        .unwrap();
        assert_eq!(image, Some(Extent::Image(ImageExtent::rect(1.0, 2.0, 3.0, 4.0))));
    }

    #[test]
    fn test_from_json_rejects_malformed() {
        assert!(matches!(
            Extent::from_json(&json!({"type": "video", "at": 1})),
            Err(ExtentError::Malformed(_))
        ));
        assert!(matches!(
            Extent::from_json(&json!({"type": "text", "startCharacter": 0, "endCharacter": 9, "text": "a"})),
            Err(ExtentError::TextLengthMismatch { .. })
        ));
        assert!(Extent::from_json(&json!({"type": "text", "startCharacter": -1, "endCharacter": 0, "text": ""})).is_err());
    }

    #[test]
    fn test_same_extent() {
        let a = Extent::text("x", 0);
        assert!(same_extent(None, None));
        assert!(same_extent(Some(&a), Some(&a.clone())));
        assert!(!same_extent(Some(&a), None));
        assert!(!same_extent(Some(&a), Some(&Extent::text("x", 1))));
    }

    #[test]
    fn test_fits_node_type() {
        assert!(Extent::text("a", 0).fits(NodeType::Text));
        assert!(Extent::image(None, None, None, None).fits(NodeType::Pdf));
        assert!(!Extent::text("a", 0).fits(NodeType::Image));
        assert!(!Extent::temporal(1.0).unwrap().fits(NodeType::Folder));
    }
}
