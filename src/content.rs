//! Annotated node content.
//!
//! Reconciliation needs to know, for the edited content, which anchor ids it
//! still references and where. [`MarkedContent`] carries exactly that: one
//! [`AnchorMark`] per referenced anchor occurrence, in document order.
//!
//! Image and temporal editors build marks directly from their overlays. Text
//! editors can use [`MarkedContent::from_html`], which flattens the editor's
//! HTML into plain text and reports every `<a target="anchor...">` span as a
//! [`TextExtent`].
//!
//! ## Flattening rules
//!
//! - Tags and comments are removed; offsets count characters, not bytes.
//! - `&amp; &lt; &gt; &quot; &apos; &#39; &nbsp;` and numeric references are
//!   decoded to one character each.
//! - `<br>` and the end of each block element (`p`, `div`, `li`, `h1`-`h6`,
//!   `blockquote`, `pre`) contribute one `\n`.
//! - `<a>` targets without the anchor marker are ordinary hyperlinks.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::types::{AnchorId, Extent, TextExtent};

/// One occurrence of an anchor reference in content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorMark {
    /// Referenced anchor.
    pub anchor_id: AnchorId,
    /// Where the reference currently sits.
    #[serde(default)]
    pub extent: Option<Extent>,
}

/// Edited content annotated with the anchors it references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkedContent {
    /// Anchor occurrences in document order.
    #[serde(default)]
    pub marks: Vec<AnchorMark>,
    /// Flattened text, when the content is textual.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl MarkedContent {
    /// Empty content: references no anchors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mark.
    pub fn with_mark(mut self, anchor_id: AnchorId, extent: Option<Extent>) -> Self {
        self.push(anchor_id, extent);
        self
    }

    /// Append a mark.
    pub fn push(&mut self, anchor_id: AnchorId, extent: Option<Extent>) {
        self.marks.push(AnchorMark { anchor_id, extent });
    }

    /// Whether no anchor is referenced.
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// One extent per referenced anchor; a repeated anchor keeps its
    /// last-seen extent.
    pub fn resolved(&self) -> BTreeMap<AnchorId, Option<Extent>> {
        self.marks
            .iter()
            .map(|m| (m.anchor_id.clone(), m.extent.clone()))
            .collect()
    }

    /// Flatten editor HTML and collect anchor spans.
    pub fn from_html(html: &str) -> Self {
        let html = comment_regex().replace_all(html, "");
        let mut flat = String::new();
        let mut flat_len = 0usize;
        // One entry per open <a>; `Some` when it references an anchor.
        let mut open_links: Vec<Option<OpenAnchor>> = Vec::new();
        let mut marks = Vec::new();
        let mut cursor = 0;

        for caps in tag_regex().captures_iter(&html) {
            let Some(whole) = caps.get(0) else { continue };
            append(&html[cursor..whole.start()], &mut flat, &mut flat_len, &mut open_links);
            cursor = whole.end();

            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let name = caps.get(2).map_or("", |m| m.as_str()).to_ascii_lowercase();
            let attrs = caps.get(3).map_or("", |m| m.as_str());

            match (name.as_str(), closing) {
                ("a", false) => {
                    let anchor = target_attr(attrs)
                        .filter(|target| AnchorId::is_anchor_reference(target))
                        .map(|target| OpenAnchor {
                            anchor_id: AnchorId::new(target),
                            start: flat_len,
                            text: String::new(),
                        });
                    open_links.push(anchor);
                }
                ("a", true) => {
                    if let Some(Some(open)) = open_links.pop() {
                        let extent = TextExtent::new(open.text, open.start);
                        marks.push(AnchorMark {
                            anchor_id: open.anchor_id,
                            extent: Some(Extent::Text(extent)),
                        });
                    }
                }
                ("br", _) => append("\n", &mut flat, &mut flat_len, &mut open_links),
                (block, true) if is_block(block) => {
                    append("\n", &mut flat, &mut flat_len, &mut open_links)
                }
                _ => {}
            }
        }
        append(&html[cursor..], &mut flat, &mut flat_len, &mut open_links);

        // Unterminated anchors still reference their span up to the end.
        for open in open_links.into_iter().flatten() {
            marks.push(AnchorMark {
                extent: Some(Extent::Text(TextExtent::new(open.text, open.start))),
                anchor_id: open.anchor_id,
            });
        }

        Self { marks, text: flat }
    }
}

struct OpenAnchor {
    anchor_id: AnchorId,
    start: usize,
    text: String,
}

/// Append decoded text to the flattened output and to every open anchor.
fn append(text: &str, flat: &mut String, flat_len: &mut usize, open: &mut [Option<OpenAnchor>]) {
    let decoded = decode_entities(text);
    *flat_len += decoded.chars().count();
    for anchor in open.iter_mut().flatten() {
        anchor.text.push_str(&decoded);
    }
    flat.push_str(&decoded);
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "pre"
    )
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)([^>]*)>").expect("static tag pattern")
    })
}

fn comment_regex() -> &'static Regex {
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    COMMENT.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("static comment pattern"))
}

fn target_regex() -> &'static Regex {
    static TARGET: OnceLock<Regex> = OnceLock::new();
    TARGET.get_or_init(|| {
        Regex::new(r#"(?i)\btarget\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static target pattern")
    })
}

fn entity_regex() -> &'static Regex {
    static ENTITY: OnceLock<Regex> = OnceLock::new();
    ENTITY.get_or_init(|| {
        Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|amp|lt|gt|quot|apos|nbsp);")
            .expect("static entity pattern")
    })
}

fn target_attr(attrs: &str) -> Option<String> {
    let caps = target_regex().captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    entity_regex()
        .replace_all(text, |caps: &regex_lite::Captures<'_>| {
            let name = &caps[1];
            let decoded = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ if name.starts_with("#x") || name.starts_with("#X") => {
                    u32::from_str_radix(&name[2..], 16).ok().and_then(char::from_u32)
                }
                _ => name[1..].parse::<u32>().ok().and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}
