//! Block converters: one plain function per block type, plus the fallback.
//!
//! A [`Converter`] is a table entry `(handles, priority, convert)`. Selection
//! happens in [`registry::ConverterRegistry::resolve`]; rendering of a whole
//! sibling list (including list coalescing and error recovery) happens in
//! [`crate::pipeline`]. Converters themselves are pure functions of the
//! block and the [`ConvertContext`].

pub mod blocks;
pub mod registry;

use crate::block::{BlockType, SourceBlock};
use crate::error::ConversionError;
use crate::pipeline::Renderer;
use std::fmt;

pub use registry::{ConverterRegistry, RegistryConfig};

/// Priority of the built-in converters.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Priority of the fallback; nothing may sort below it.
pub const FALLBACK_PRIORITY: i32 = i32::MIN;

pub type ConvertFn = fn(&SourceBlock, &ConvertContext<'_>) -> Result<String, ConversionError>;

/// Block types a converter claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handles {
    Types(Vec<BlockType>),
    Any,
}

#[derive(Clone)]
pub struct Converter {
    name: String,
    handles: Handles,
    priority: i32,
    needs_children: bool,
    convert: ConvertFn,
}

impl Converter {
    pub fn new(name: impl Into<String>, types: Vec<BlockType>, convert: ConvertFn) -> Self {
        Self {
            name: name.into(),
            handles: Handles::Types(types),
            priority: DEFAULT_PRIORITY,
            needs_children: false,
            convert,
        }
    }

    /// The catch-all converter.
    pub fn fallback() -> Self {
        Self {
            name: "fallback".to_string(),
            handles: Handles::Any,
            priority: FALLBACK_PRIORITY,
            needs_children: false,
            convert: convert_fallback,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Declares that children must be materialized before `convert` runs.
    pub fn needing_children(mut self) -> Self {
        self.needs_children = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handles(&self) -> &Handles {
        &self.handles
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn needs_children(&self) -> bool {
        self.needs_children
    }

    pub fn supports(&self, block_type: &BlockType) -> bool {
        match &self.handles {
            Handles::Any => true,
            Handles::Types(types) => types.contains(block_type),
        }
    }

    pub fn convert(
        &self,
        block: &SourceBlock,
        ctx: &ConvertContext<'_>,
    ) -> Result<String, ConversionError> {
        (self.convert)(block, ctx)
    }

    pub(crate) fn is_catch_all(&self) -> bool {
        self.handles == Handles::Any
    }

    /// Drops claims on `types`; returns false when nothing is left.
    pub(crate) fn release(&mut self, types: &[BlockType]) -> bool {
        match &mut self.handles {
            Handles::Any => true,
            Handles::Types(own) => {
                own.retain(|t| !types.contains(t));
                !own.is_empty()
            }
        }
    }

    pub(crate) fn force_priority(&mut self, priority: i32) {
        self.priority = priority;
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("name", &self.name)
            .field("handles", &self.handles)
            .field("priority", &self.priority)
            .field("needs_children", &self.needs_children)
            .finish()
    }
}

/// What a converter may ask of the pipeline while rendering one block.
pub struct ConvertContext<'a> {
    renderer: &'a Renderer<'a>,
    depth: usize,
}

impl<'a> ConvertContext<'a> {
    pub(crate) fn new(renderer: &'a Renderer<'a>, depth: usize) -> Self {
        Self { renderer, depth }
    }

    /// Nesting depth of the block being converted (top level is 0).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Renders `block`'s children as a sibling list, with list coalescing.
    pub fn render_children(&self, block: &SourceBlock) -> String {
        self.renderer
            .render_siblings(block.children(), child_depth(block, self.depth))
    }
}

/// Depth assigned to the children of `parent` sitting at `depth`.
pub(crate) fn child_depth(parent: &SourceBlock, depth: usize) -> usize {
    if parent.block_type.is_structural() {
        depth
    } else {
        depth + 1
    }
}

fn convert_fallback(block: &SourceBlock, _ctx: &ConvertContext<'_>) -> Result<String, ConversionError> {
    Ok(fallback_markup(&block.block_type.tag(), &block.id, None))
}

/// Marker comment left in place of content that could not be converted.
pub fn fallback_markup(block_type: &str, block_id: &str, reason: Option<&str>) -> String {
    let mut out = format!(
        "<!-- notion-press:unsupported type=\"{}\" id=\"{}\"",
        comment_safe(block_type),
        comment_safe(block_id)
    );
    if let Some(reason) = reason {
        out.push_str(&format!(" reason=\"{}\"", comment_safe(reason)));
    }
    out.push_str(" -->");
    out
}

// Keeps a value from terminating the comment or its attribute early.
fn comment_safe(value: &str) -> String {
    let mut s = value.replace('"', "'").replace(['\n', '\r'], " ");
    while s.contains("--") {
        s = s.replace("--", "-");
    }
    s.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_supports_everything_at_lowest_priority() {
        let fallback = Converter::fallback();
        assert!(fallback.supports(&BlockType::Paragraph));
        assert!(fallback.supports(&BlockType::Unsupported("ai_block".into())));
        assert_eq!(fallback.priority(), FALLBACK_PRIORITY);
    }

    #[test]
    fn fallback_markup_names_type_and_id() {
        assert_eq!(
            fallback_markup("synced_block", "abc-123", None),
            "<!-- notion-press:unsupported type=\"synced_block\" id=\"abc-123\" -->"
        );
    }

    #[test]
    fn fallback_markup_cannot_close_the_comment_early() {
        let out = fallback_markup("evil-->", "id\"x", Some("bad -- input\n"));
        assert_eq!(out.matches("-->").count(), 1);
        assert!(out.ends_with(" -->"));
        assert!(out.contains("id=\"id'x\""));
    }

    #[test]
    fn release_drops_claimed_types() {
        let mut conv = Converter::new(
            "text",
            vec![BlockType::Paragraph, BlockType::Quote],
            convert_fallback,
        );
        assert!(conv.release(&[BlockType::Paragraph]));
        assert!(!conv.supports(&BlockType::Paragraph));
        assert!(conv.supports(&BlockType::Quote));
        assert!(!conv.release(&[BlockType::Quote]));
    }
}
