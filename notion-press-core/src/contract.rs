//! # contract: interfaces to the source content API and the target publisher
//!
//! The core never talks HTTP itself. It reaches the outside world through two
//! traits:
//!
//! - [`ContentFetcher`]: lists pages, reads page metadata and pages through a
//!   block's children with an opaque cursor (100 blocks per request).
//! - [`Publisher`]: creates or updates a post from rendered markup.
//!
//! A third trait, [`PageSyncer`], is the seam between the batch processor and
//! the orchestrator, so batches can be exercised without a real sync stack.
//!
//! Both are annotated for `mockall`, so tests can script every remote call
//! and assert that no call happened at all (e.g. on the delta short-circuit).
//! Mocks are exported under the default `test-export-mocks` feature for use
//! by the CLI crate's tests.
//!
//! Implementations live in the CLI crate (reqwest clients) and in tests.

use crate::block::SourceBlock;
use crate::error::{FetchError, UpsertError};
use crate::synchronise::{SyncOptions, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Blocks fetched per children request.
pub const BLOCK_PAGE_SIZE: usize = 100;

/// Page metadata as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    pub modified_at: DateTime<Utc>,
}

/// One page of a block's children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockPage {
    pub blocks: Vec<SourceBlock>,
    /// Cursor for the next request, `None` when this was the last page.
    pub next_cursor: Option<String>,
}

/// Read access to the source document API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Every page the integration can see.
    async fn list_accessible_pages(&self) -> Result<Vec<PageSummary>, FetchError>;

    /// Metadata for one page.
    async fn fetch_page(&self, page_id: &str) -> Result<PageSummary, FetchError>;

    /// One page of children of `block_id` (a page id is also a block id).
    async fn fetch_blocks(
        &self,
        block_id: &str,
        cursor: Option<String>,
    ) -> Result<BlockPage, FetchError>;
}

/// Write access to the target publishing system.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Creates a post and returns its id.
    async fn create_post(&self, title: &str, markup: &str) -> Result<i64, UpsertError>;

    /// Replaces title and content of an existing post.
    async fn update_post(&self, target_id: i64, title: &str, markup: &str)
        -> Result<(), UpsertError>;
}

/// Syncs one source page end to end. Never fails: problems are reported in
/// the returned [`SyncResult`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PageSyncer: Send + Sync {
    async fn sync_page(&self, source_id: &str, options: SyncOptions) -> SyncResult;
}

/// Fetches every child of `block_id`, following cursors until exhausted.
pub async fn fetch_all_children<F>(fetcher: &F, block_id: &str) -> Result<Vec<SourceBlock>, FetchError>
where
    F: ContentFetcher + ?Sized,
{
    let mut blocks = Vec::new();
    let mut cursor = None;
    loop {
        let page = fetcher.fetch_blocks(block_id, cursor).await?;
        tracing::debug!(
            block_id,
            fetched = page.blocks.len(),
            has_more = page.next_cursor.is_some(),
            "Fetched page of child blocks"
        );
        blocks.extend(page.blocks);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use crate::rich_text::RichTextRun;
    use mockall::predicate::eq;

    fn para(id: &str) -> SourceBlock {
        SourceBlock::text(id, BlockType::Paragraph, vec![RichTextRun::plain(id)])
    }

    #[tokio::test]
    async fn fetch_all_children_follows_cursors_in_order() {
        let mut fetcher = MockContentFetcher::new();
        fetcher
            .expect_fetch_blocks()
            .with(eq("page"), eq(None::<String>))
            .times(1)
            .returning(|_, _| {
                Ok(BlockPage {
                    blocks: vec![para("a"), para("b")],
                    next_cursor: Some("c1".into()),
                })
            });
        fetcher
            .expect_fetch_blocks()
            .with(eq("page"), eq(Some("c1".to_string())))
            .times(1)
            .returning(|_, _| {
                Ok(BlockPage {
                    blocks: vec![para("c")],
                    next_cursor: None,
                })
            });

        let blocks = fetch_all_children(&fetcher, "page").await.unwrap();
        let ids: Vec<_> = blocks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn fetch_all_children_propagates_errors() {
        let mut fetcher = MockContentFetcher::new();
        fetcher
            .expect_fetch_blocks()
            .returning(|_, _| Err(FetchError::NotFound("page".into())));
        let err = fetch_all_children(&fetcher, "page").await.unwrap_err();
        assert_eq!(err, FetchError::NotFound("page".into()));
    }
}
