//! Block conversion pipeline: source block tree in, post markup out.
//!
//! Conversion runs in two phases:
//!
//! 1. **Materialize** (async). Children that a converter needs but that were
//!    not delivered with the tree are fetched through the [`ContentFetcher`],
//!    following cursors until exhausted. Expansion stops below `max_depth`;
//!    blocks one level past the bound are fetched but not expanded further.
//!    The input tree is never mutated.
//! 2. **Render** (pure). Siblings render in input order. Runs of bulleted or
//!    numbered items are coalesced into a single list container. Blocks past
//!    `max_depth` render through the fallback. A converter error or panic is
//!    replaced by the fallback marker for that block alone.
//!
//! Only fetch failures escape [`BlockPipeline::convert_tree`]; conversion
//! problems never do.

use crate::block::{ListKind, SourceBlock};
use crate::contract::{fetch_all_children, ContentFetcher};
use crate::converter::blocks::wrap_block;
use crate::converter::{child_depth, fallback_markup, ConvertContext, ConverterRegistry};
use crate::error::{ConversionError, FetchError};
use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default nesting bound.
pub const DEFAULT_MAX_DEPTH: usize = 3;

const BLOCK_SEPARATOR: &str = "\n\n";

pub struct BlockPipeline<F: ?Sized> {
    registry: Arc<ConverterRegistry>,
    fetcher: Arc<F>,
}

impl<F> BlockPipeline<F>
where
    F: ContentFetcher + ?Sized,
{
    pub fn new(registry: Arc<ConverterRegistry>, fetcher: Arc<F>) -> Self {
        Self { registry, fetcher }
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    /// Fetches a page's top-level blocks and converts the whole tree.
    pub async fn convert_page(&self, page_id: &str, max_depth: usize) -> Result<String, FetchError> {
        let roots = fetch_all_children(self.fetcher.as_ref(), page_id).await?;
        self.convert_tree(&roots, max_depth).await
    }

    /// Converts `roots` (and their descendants) into markup.
    pub async fn convert_tree(
        &self,
        roots: &[SourceBlock],
        max_depth: usize,
    ) -> Result<String, FetchError> {
        let tree = self.materialize(roots, 0, max_depth).await?;
        Ok(render_tree(&self.registry, &tree, max_depth))
    }

    fn materialize<'a>(
        &'a self,
        blocks: &'a [SourceBlock],
        depth: usize,
        max_depth: usize,
    ) -> BoxFuture<'a, Result<Vec<SourceBlock>, FetchError>> {
        async move {
            let mut out = Vec::with_capacity(blocks.len());
            for block in blocks {
                let mut block = block.clone();
                let wants_children = block.has_children
                    && depth <= max_depth
                    && self.registry.resolve(&block.block_type).needs_children();
                if wants_children {
                    let children = match block.children.take() {
                        Some(children) => children,
                        None => {
                            debug!(block_id = %block.id, block_type = %block.block_type, depth, "Fetching children");
                            fetch_all_children(self.fetcher.as_ref(), &block.id).await?
                        }
                    };
                    let next_depth = child_depth(&block, depth);
                    let children = if next_depth <= max_depth {
                        self.materialize(&children, next_depth, max_depth).await?
                    } else {
                        children
                    };
                    block.children = Some(children);
                }
                out.push(block);
            }
            Ok(out)
        }
        .boxed()
    }
}

/// Renders an already materialized tree. Pure and infallible.
pub fn render_tree(registry: &ConverterRegistry, blocks: &[SourceBlock], max_depth: usize) -> String {
    Renderer {
        registry,
        max_depth,
    }
    .render_siblings(blocks, 0)
}

pub(crate) struct Renderer<'r> {
    registry: &'r ConverterRegistry,
    max_depth: usize,
}

impl Renderer<'_> {
    pub(crate) fn render_siblings(&self, blocks: &[SourceBlock], depth: usize) -> String {
        let mut parts = Vec::with_capacity(blocks.len());
        let mut i = 0;
        while i < blocks.len() {
            let kind = blocks[i].block_type.list_kind();
            match kind {
                Some(kind) if depth <= self.max_depth => {
                    let start = i;
                    while i < blocks.len() && blocks[i].block_type.list_kind() == Some(kind) {
                        i += 1;
                    }
                    parts.push(self.render_list(kind, &blocks[start..i], depth));
                }
                _ => {
                    parts.push(self.render_block(&blocks[i], depth));
                    i += 1;
                }
            }
        }
        parts.join(BLOCK_SEPARATOR)
    }

    fn render_list(&self, kind: ListKind, items: &[SourceBlock], depth: usize) -> String {
        let items = items
            .iter()
            .map(|item| self.render_block(item, depth))
            .collect::<Vec<_>>()
            .join("\n");
        match kind {
            ListKind::Unordered => wrap_block(
                "list",
                None,
                &format!("<ul class=\"wp-block-list\">{items}</ul>"),
            ),
            ListKind::Ordered => wrap_block(
                "list",
                Some(&json!({ "ordered": true })),
                &format!("<ol class=\"wp-block-list\">{items}</ol>"),
            ),
        }
    }

    fn render_block(&self, block: &SourceBlock, depth: usize) -> String {
        let converter = if depth > self.max_depth {
            self.registry.fallback()
        } else {
            self.registry.resolve(&block.block_type)
        };
        let ctx = ConvertContext::new(self, depth);

        let outcome = catch_unwind(AssertUnwindSafe(|| converter.convert(block, &ctx)))
            .unwrap_or_else(|panic| Err(ConversionError::Panicked(panic_message(panic.as_ref()))));

        let (markup, children_rendered) = match outcome {
            Ok(markup) => (markup, converter.needs_children()),
            Err(err) => {
                warn!(
                    block_id = %block.id,
                    block_type = %block.block_type,
                    converter = converter.name(),
                    error = %err,
                    "Converter failed, substituting fallback"
                );
                let marker = fallback_markup(&block.block_type.tag(), &block.id, Some(&err.to_string()));
                (marker, false)
            }
        };
        if children_rendered {
            return markup;
        }
        match lost_children(block) {
            Some(markers) => format!("{markup}\n{markers}"),
            None => markup,
        }
    }
}

/// Markers for children that the block's converter did not render.
fn lost_children(block: &SourceBlock) -> Option<String> {
    match &block.children {
        Some(children) if !children.is_empty() => {
            let reason = format!("child of {} {}", block.block_type, block.id);
            let markers = children
                .iter()
                .map(|child| fallback_markup(&child.block_type.tag(), &child.id, Some(&reason)))
                .collect::<Vec<_>>();
            debug!(block_id = %block.id, lost = markers.len(), "Flagging unrendered children");
            Some(markers.join("\n"))
        }
        None if block.has_children => Some(fallback_markup(
            &block.block_type.tag(),
            &block.id,
            Some("children not rendered"),
        )),
        _ => None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use crate::contract::{BlockPage, MockContentFetcher};
    use crate::converter::{Converter, RegistryConfig};
    use crate::rich_text::RichTextRun;
    use mockall::predicate::eq;

    fn text(id: &str, ty: BlockType, content: &str) -> SourceBlock {
        SourceBlock::text(id, ty, vec![RichTextRun::plain(content)])
    }

    fn render(blocks: &[SourceBlock]) -> String {
        render_tree(&ConverterRegistry::with_builtins(), blocks, DEFAULT_MAX_DEPTH)
    }

    #[test]
    fn consecutive_bullets_share_one_list() {
        let out = render(&[
            text("a", BlockType::BulletedListItem, "A"),
            text("b", BlockType::BulletedListItem, "B"),
        ]);
        assert_eq!(out.matches("<ul").count(), 1);
        assert_eq!(out.matches("<li>").count(), 2);
    }

    #[test]
    fn list_kind_change_starts_new_container() {
        let out = render(&[
            text("a", BlockType::BulletedListItem, "A"),
            text("b", BlockType::NumberedListItem, "B"),
            text("c", BlockType::NumberedListItem, "C"),
        ]);
        assert_eq!(out.matches("<ul").count(), 1);
        assert_eq!(out.matches("<ol").count(), 1);
        assert!(out.contains("<!-- wp:list {\"ordered\":true} -->"));
        assert!(out.find("<ul").unwrap() < out.find("<ol").unwrap());
    }

    #[test]
    fn intervening_block_splits_lists() {
        let out = render(&[
            text("a", BlockType::BulletedListItem, "A"),
            text("p", BlockType::Paragraph, "between"),
            text("b", BlockType::BulletedListItem, "B"),
        ]);
        assert_eq!(out.matches("<ul").count(), 2);
    }

    #[test]
    fn panicking_converter_is_contained() {
        fn boom(_: &SourceBlock, _: &ConvertContext<'_>) -> Result<String, ConversionError> {
            panic!("kaboom")
        }
        let registry = ConverterRegistry::from_config(RegistryConfig {
            builtins: true,
            extra: vec![Converter::new("boom", vec![BlockType::Divider], boom)],
        });
        let out = render_tree(
            &registry,
            &[
                text("p1", BlockType::Paragraph, "before"),
                SourceBlock::new("d1", BlockType::Divider, serde_json::Value::Null),
                text("p2", BlockType::Paragraph, "after"),
            ],
            DEFAULT_MAX_DEPTH,
        );
        assert!(out.contains("before"));
        assert!(out.contains("after"));
        assert!(out.contains("type=\"divider\" id=\"d1\""));
        assert!(out.contains("kaboom"));
    }

    #[test]
    fn blocks_past_max_depth_render_through_fallback() {
        let deep = text("inner", BlockType::Paragraph, "too deep");
        let item = text("item", BlockType::BulletedListItem, "top").with_children(vec![deep]);
        let out = render_tree(&ConverterRegistry::with_builtins(), &[item], 0);
        assert!(out.contains("top"));
        assert!(!out.contains("too deep"));
        assert!(out.contains("type=\"paragraph\" id=\"inner\""));
    }

    #[tokio::test]
    async fn fetches_missing_children_for_converters_that_need_them() {
        let mut fetcher = MockContentFetcher::new();
        fetcher
            .expect_fetch_blocks()
            .with(eq("toggle-1"), eq(None::<String>))
            .times(1)
            .returning(|_, _| {
                Ok(BlockPage {
                    blocks: vec![SourceBlock::text(
                        "child",
                        BlockType::Paragraph,
                        vec![RichTextRun::plain("hidden body")],
                    )],
                    next_cursor: None,
                })
            });
        let pipeline = BlockPipeline::new(Arc::new(ConverterRegistry::with_builtins()), Arc::new(fetcher));
        let toggle = text("toggle-1", BlockType::Toggle, "Details").with_unfetched_children();

        let out = pipeline.convert_tree(&[toggle.clone()], DEFAULT_MAX_DEPTH).await.unwrap();
        assert!(out.contains("<summary>Details</summary>"));
        assert!(out.contains("hidden body"));
        // Input is untouched.
        assert_eq!(toggle.children, None);
    }

    #[tokio::test]
    async fn unfetched_children_of_childless_converters_are_flagged() {
        let mut fetcher = MockContentFetcher::new();
        fetcher.expect_fetch_blocks().times(0);
        let pipeline = BlockPipeline::new(Arc::new(ConverterRegistry::with_builtins()), Arc::new(fetcher));
        let code = SourceBlock::new(
            "c",
            BlockType::Code,
            json!({ "rich_text": [RichTextRun::plain("x = 1")], "language": "python" }),
        )
        .with_unfetched_children();
        let out = pipeline.convert_tree(&[code], DEFAULT_MAX_DEPTH).await.unwrap();
        assert!(out.contains("x = 1"));
        assert!(out.contains("type=\"code\" id=\"c\" reason=\"children not rendered\""));
    }

    #[test]
    fn indented_paragraph_children_are_rendered() {
        let child = text("c1", BlockType::Paragraph, "INDENTED");
        let parent = text("p", BlockType::Paragraph, "parent").with_children(vec![child]);
        let out = render(&[parent]);
        assert!(out.find("parent").unwrap() < out.find("INDENTED").unwrap());
        assert!(!out.contains("notion-press:unsupported"));
    }

    #[test]
    fn materialized_children_of_childless_converters_get_one_marker_each() {
        let divider = SourceBlock::new("c", BlockType::Divider, serde_json::Value::Null).with_children(vec![
            text("k1", BlockType::Paragraph, "first"),
            text("k2", BlockType::Paragraph, "second"),
        ]);
        let out = render(&[divider]);
        assert!(out.contains("<hr"));
        assert!(!out.contains("first"));
        assert!(out.contains("type=\"paragraph\" id=\"k1\" reason=\"child of divider c\""));
        assert!(out.contains("type=\"paragraph\" id=\"k2\" reason=\"child of divider c\""));
    }

    #[tokio::test]
    async fn paragraph_children_are_fetched() {
        let mut fetcher = MockContentFetcher::new();
        fetcher
            .expect_fetch_blocks()
            .with(eq("p"), eq(None::<String>))
            .times(1)
            .returning(|_, _| {
                Ok(BlockPage {
                    blocks: vec![SourceBlock::text(
                        "c1",
                        BlockType::Paragraph,
                        vec![RichTextRun::plain("nested")],
                    )],
                    next_cursor: None,
                })
            });
        let pipeline = BlockPipeline::new(Arc::new(ConverterRegistry::with_builtins()), Arc::new(fetcher));
        let para = text("p", BlockType::Paragraph, "flat").with_unfetched_children();
        let out = pipeline.convert_tree(&[para], DEFAULT_MAX_DEPTH).await.unwrap();
        assert!(out.contains("flat"));
        assert!(out.contains("nested"));
    }

    #[tokio::test]
    async fn fetch_errors_abort_conversion() {
        let mut fetcher = MockContentFetcher::new();
        fetcher
            .expect_fetch_blocks()
            .returning(|_, _| Err(FetchError::Unreachable("timeout".into())));
        let pipeline = BlockPipeline::new(Arc::new(ConverterRegistry::with_builtins()), Arc::new(fetcher));
        let toggle = text("t", BlockType::Toggle, "x").with_unfetched_children();
        let err = pipeline.convert_tree(&[toggle], DEFAULT_MAX_DEPTH).await.unwrap_err();
        assert_eq!(err, FetchError::Unreachable("timeout".into()));
    }
}
