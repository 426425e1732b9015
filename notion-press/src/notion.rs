#![doc = "Notion API client: implements the core `ContentFetcher` trait over reqwest."]
//
//! # Notion integration (CLI <-> Core)
//!
//! [`NotionClient`] talks to the public Notion REST API:
//!
//! - `POST /v1/search` (pages only, cursor-paginated) for [`ContentFetcher::list_accessible_pages`]
//! - `GET /v1/pages/{id}` for [`ContentFetcher::fetch_page`]
//! - `GET /v1/blocks/{id}/children` for [`ContentFetcher::fetch_blocks`]
//!
//! Construct it with [`NotionClient::new_from_env`], which reads the
//! integration token from `NOTION_TOKEN`. HTTP statuses are mapped onto
//! [`FetchError`] so the core can decide what to retry: 429 becomes
//! `RateLimited` (with `Retry-After` when sent), 404 becomes `NotFound`.

use crate::load_config::SourceSection;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notion_press_core::block::SourceBlock;
use notion_press_core::contract::{BlockPage, ContentFetcher, PageSummary, BLOCK_PAGE_SIZE};
use notion_press_core::error::FetchError;
use notion_press_core::rich_text::{self, RichTextRun};
use regex::Regex;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;

const UNTITLED: &str = "Untitled";

pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    version: String,
}

impl NotionClient {
    pub fn new(section: &SourceSection, token: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .context("Failed to build HTTP client for Notion")?;
        Ok(Self {
            http,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            version: section.notion_version.clone(),
        })
    }

    pub fn new_from_env(section: &SourceSection) -> anyhow::Result<Self> {
        let token = env::var("NOTION_TOKEN").map_err(|e| {
            tracing::error!(error = ?e, "NOTION_TOKEN missing in environment");
            anyhow::anyhow!("NOTION_TOKEN must be set: {e}")
        })?;
        tracing::info!(
            base_url = %section.base_url,
            notion_version = %section.notion_version,
            "Initialized NotionClient from environment"
        );
        Self::new(section, token)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", &self.version)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, FetchError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| FetchError::Malformed(format!("{what}: {e}")));
        }
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        let err = status_error(status, retry_after, what, body);
        tracing::warn!(status = status.as_u16(), error = %err, "Notion request failed");
        Err(err)
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    filter: SearchFilter,
    page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_cursor: Option<&'a str>,
}

#[derive(Serialize)]
struct SearchFilter {
    property: &'static str,
    value: &'static str,
}

#[derive(Deserialize)]
struct Paginated<T> {
    results: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

impl<T> Paginated<T> {
    fn cursor(&self) -> Option<String> {
        if self.has_more {
            self.next_cursor.clone()
        } else {
            None
        }
    }
}

#[derive(Deserialize)]
struct RawPage {
    id: String,
    last_edited_time: DateTime<Utc>,
    #[serde(default)]
    properties: HashMap<String, RawProperty>,
}

#[derive(Deserialize)]
struct RawProperty {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: Vec<RichTextRun>,
}

impl From<RawPage> for PageSummary {
    fn from(page: RawPage) -> Self {
        let title = page
            .properties
            .values()
            .find(|p| p.kind == "title")
            .map(|p| rich_text::plain_text(&p.title))
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNTITLED.to_string());
        PageSummary {
            id: page.id,
            title,
            modified_at: page.last_edited_time,
        }
    }
}

#[async_trait]
impl ContentFetcher for NotionClient {
    async fn list_accessible_pages(&self) -> Result<Vec<PageSummary>, FetchError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let body = SearchRequest {
                filter: SearchFilter {
                    property: "object",
                    value: "page",
                },
                page_size: BLOCK_PAGE_SIZE,
                start_cursor: cursor.as_deref(),
            };
            let request = self.request(Method::POST, "/v1/search").json(&body);
            let batch: Paginated<RawPage> = self.send_json(request, "search").await?;
            cursor = batch.cursor();
            pages.extend(batch.results.into_iter().map(PageSummary::from));
            if cursor.is_none() {
                break;
            }
        }
        tracing::info!(pages = pages.len(), "Listed accessible Notion pages");
        Ok(pages)
    }

    async fn fetch_page(&self, page_id: &str) -> Result<PageSummary, FetchError> {
        let request = self.request(Method::GET, &format!("/v1/pages/{page_id}"));
        let page: RawPage = self.send_json(request, page_id).await?;
        Ok(page.into())
    }

    async fn fetch_blocks(
        &self,
        block_id: &str,
        cursor: Option<String>,
    ) -> Result<BlockPage, FetchError> {
        let mut query = vec![("page_size", BLOCK_PAGE_SIZE.to_string())];
        if let Some(cursor) = cursor {
            query.push(("start_cursor", cursor));
        }
        let request = self
            .request(Method::GET, &format!("/v1/blocks/{block_id}/children"))
            .query(&query);
        let page: Paginated<SourceBlock> = self.send_json(request, block_id).await?;
        let next_cursor = page.cursor();
        Ok(BlockPage {
            blocks: page.results,
            next_cursor,
        })
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_decode() {
        FetchError::Malformed(err.to_string())
    } else {
        FetchError::Unreachable(err.to_string())
    }
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, what: &str, body: String) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
        StatusCode::NOT_FOUND => FetchError::NotFound(what.to_string()),
        _ => FetchError::Status {
            status: status.as_u16(),
            message: body,
        },
    }
}

/// Seconds form only; HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn page_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)([0-9a-f]{8})-?([0-9a-f]{4})-?([0-9a-f]{4})-?([0-9a-f]{4})-?([0-9a-f]{12})")
                .ok()
        })
        .as_ref()
}

/// Accepts a dashed id, an undashed id or a Notion URL and returns the
/// canonical dashed, lowercase id.
pub fn normalize_page_id(input: &str) -> Option<String> {
    // Drop query and fragment; `?p=` and `#block` suffixes carry other ids.
    let path = input.split(['?', '#']).next().unwrap_or(input);
    let caps = page_id_pattern()?.captures_iter(path).last()?;
    let parts: Vec<&str> = (1..=5).filter_map(|i| caps.get(i).map(|m| m.as_str())).collect();
    Some(parts.join("-").to_lowercase())
}
