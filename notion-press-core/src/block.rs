//! Source block tree as delivered by the content API.
//!
//! A [`SourceBlock`] keeps its type-specific payload as raw JSON; the
//! converter that owns the tag decodes it into one of the payload structs
//! below via [`SourceBlock::payload`]. A payload that fails to decode is a
//! per-block [`ConversionError`], never a fetch failure.

use crate::error::ConversionError;
use crate::rich_text::{RichTextRun, TextColor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Block type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockType {
    Paragraph,
    /// `heading_1` through `heading_6`.
    Heading(u8),
    BulletedListItem,
    NumberedListItem,
    Quote,
    Callout,
    Toggle,
    Code,
    Table,
    TableRow,
    ColumnList,
    Column,
    Image,
    File,
    Embed,
    Video,
    Bookmark,
    Divider,
    /// Any tag outside the known set; carries the original tag.
    Unsupported(String),
}

impl BlockType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "paragraph" => BlockType::Paragraph,
            "bulleted_list_item" => BlockType::BulletedListItem,
            "numbered_list_item" => BlockType::NumberedListItem,
            "quote" => BlockType::Quote,
            "callout" => BlockType::Callout,
            "toggle" => BlockType::Toggle,
            "code" => BlockType::Code,
            "table" => BlockType::Table,
            "table_row" => BlockType::TableRow,
            "column_list" => BlockType::ColumnList,
            "column" => BlockType::Column,
            "image" => BlockType::Image,
            "file" => BlockType::File,
            "embed" => BlockType::Embed,
            "video" => BlockType::Video,
            "bookmark" => BlockType::Bookmark,
            "divider" => BlockType::Divider,
            other => match other
                .strip_prefix("heading_")
                .and_then(|n| n.parse::<u8>().ok())
            {
                Some(level @ 1..=6) => BlockType::Heading(level),
                _ => BlockType::Unsupported(other.to_string()),
            },
        }
    }

    pub fn tag(&self) -> String {
        match self {
            BlockType::Paragraph => "paragraph".into(),
            BlockType::Heading(level) => format!("heading_{level}"),
            BlockType::BulletedListItem => "bulleted_list_item".into(),
            BlockType::NumberedListItem => "numbered_list_item".into(),
            BlockType::Quote => "quote".into(),
            BlockType::Callout => "callout".into(),
            BlockType::Toggle => "toggle".into(),
            BlockType::Code => "code".into(),
            BlockType::Table => "table".into(),
            BlockType::TableRow => "table_row".into(),
            BlockType::ColumnList => "column_list".into(),
            BlockType::Column => "column".into(),
            BlockType::Image => "image".into(),
            BlockType::File => "file".into(),
            BlockType::Embed => "embed".into(),
            BlockType::Video => "video".into(),
            BlockType::Bookmark => "bookmark".into(),
            BlockType::Divider => "divider".into(),
            BlockType::Unsupported(tag) => tag.clone(),
        }
    }

    /// List kind for sibling coalescing, if this is a list item.
    pub fn list_kind(&self) -> Option<ListKind> {
        match self {
            BlockType::BulletedListItem => Some(ListKind::Unordered),
            BlockType::NumberedListItem => Some(ListKind::Ordered),
            _ => None,
        }
    }

    /// Structural containers do not count towards nesting depth.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            BlockType::Table | BlockType::TableRow | BlockType::ColumnList | BlockType::Column
        )
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

impl From<String> for BlockType {
    fn from(value: String) -> Self {
        BlockType::from_tag(&value)
    }
}

impl From<BlockType> for String {
    fn from(value: BlockType) -> Self {
        value.tag()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Unordered,
    Ordered,
}

/// One node of a source page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBlock", into = "RawBlock")]
pub struct SourceBlock {
    pub id: String,
    pub block_type: BlockType,
    pub payload: Value,
    pub has_children: bool,
    /// `None` until fetched; `Some(vec![])` means fetched and empty.
    pub children: Option<Vec<SourceBlock>>,
}

impl SourceBlock {
    pub fn new(id: impl Into<String>, block_type: BlockType, payload: Value) -> Self {
        Self {
            id: id.into(),
            block_type,
            payload,
            has_children: false,
            children: None,
        }
    }

    /// A text-bearing block (`paragraph`, headings, list items, quote, toggle).
    pub fn text(id: impl Into<String>, block_type: BlockType, runs: Vec<RichTextRun>) -> Self {
        let payload = serde_json::json!({ "rich_text": runs, "color": "default" });
        Self::new(id, block_type, payload)
    }

    /// Marks the block as having children that still need fetching.
    pub fn with_unfetched_children(mut self) -> Self {
        self.has_children = true;
        self.children = None;
        self
    }

    pub fn with_children(mut self, children: Vec<SourceBlock>) -> Self {
        self.has_children = !children.is_empty();
        self.children = Some(children);
        self
    }

    /// Decodes the type-specific payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ConversionError> {
        T::deserialize(&self.payload).map_err(|e| ConversionError::Malformed {
            block_type: self.block_type.tag(),
            reason: e.to_string(),
        })
    }

    pub fn children(&self) -> &[SourceBlock] {
        self.children.as_deref().unwrap_or(&[])
    }
}

// Wire shape: `{"id", "type", "has_children", "<type>": {...}}`.
#[derive(Serialize, Deserialize)]
struct RawBlock {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    has_children: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Vec<SourceBlock>>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl From<RawBlock> for SourceBlock {
    fn from(mut raw: RawBlock) -> Self {
        let payload = raw.rest.remove(&raw.kind).unwrap_or(Value::Null);
        SourceBlock {
            id: raw.id,
            block_type: BlockType::from_tag(&raw.kind),
            payload,
            has_children: raw.has_children,
            children: raw.children,
        }
    }
}

impl From<SourceBlock> for RawBlock {
    fn from(block: SourceBlock) -> Self {
        let kind = block.block_type.tag();
        let mut rest = Map::new();
        rest.insert(kind.clone(), block.payload);
        RawBlock {
            id: block.id,
            kind,
            has_children: block.has_children,
            children: block.children,
            rest,
        }
    }
}

/// Payload of paragraph, headings, list items, quote and toggle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextPayload {
    #[serde(default)]
    pub rich_text: Vec<RichTextRun>,
    #[serde(default)]
    pub color: TextColor,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Icon {
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalloutPayload {
    #[serde(default)]
    pub rich_text: Vec<RichTextRun>,
    #[serde(default)]
    pub icon: Option<Icon>,
    #[serde(default)]
    pub color: TextColor,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodePayload {
    #[serde(default)]
    pub rich_text: Vec<RichTextRun>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub caption: Vec<RichTextRun>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TablePayload {
    #[serde(default)]
    pub table_width: usize,
    #[serde(default)]
    pub has_column_header: bool,
    #[serde(default)]
    pub has_row_header: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableRowPayload {
    pub cells: Vec<Vec<RichTextRun>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlRef {
    pub url: String,
}

/// Payload of image, file, video, embed and bookmark.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub external: Option<UrlRef>,
    #[serde(default)]
    pub file: Option<UrlRef>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub caption: Vec<RichTextRun>,
    #[serde(default)]
    pub name: Option<String>,
}

impl MediaPayload {
    pub fn url(&self) -> Option<&str> {
        self.external
            .as_ref()
            .or(self.file.as_ref())
            .map(|r| r.url.as_str())
            .or(self.url.as_deref())
            .filter(|u| !u.trim().is_empty())
    }

    /// True when the media is hosted by the source rather than linked externally.
    pub fn is_hosted(&self) -> bool {
        self.file.is_some()
    }
}
