//! WordPress REST publisher: implements the core `Publisher` trait.
//!
//! Authenticates with an application password over basic auth
//! (`WP_USERNAME` / `WP_APP_PASSWORD`). New posts get the configured
//! `post_status`; updates only replace title and content, so an editor's
//! publish decision on the WordPress side is kept.

use crate::load_config::{PostStatus, TargetSection};
use anyhow::Context;
use async_trait::async_trait;
use notion_press_core::contract::Publisher;
use notion_press_core::error::UpsertError;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub struct WordPressClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    app_password: String,
    post_status: PostStatus,
}

#[derive(Serialize)]
struct PostBody<'a> {
    title: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
}

#[derive(Deserialize)]
struct CreatedPost {
    id: i64,
}

impl WordPressClient {
    pub fn new(
        section: &TargetSection,
        username: impl Into<String>,
        app_password: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .context("Failed to build HTTP client for WordPress")?;
        Ok(Self {
            http,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            username: username.into(),
            app_password: app_password.into(),
            post_status: section.post_status,
        })
    }

    pub fn new_from_env(section: &TargetSection) -> anyhow::Result<Self> {
        match (env::var("WP_USERNAME"), env::var("WP_APP_PASSWORD")) {
            (Ok(username), Ok(app_password)) => {
                tracing::info!(
                    base_url = %section.base_url,
                    username = %username,
                    post_status = section.post_status.as_str(),
                    "Initialized WordPressClient from environment"
                );
                Self::new(section, username, app_password)
            }
            (Err(e), _) => {
                tracing::error!(error = ?e, "WP_USERNAME missing in environment");
                Err(anyhow::anyhow!("WP_USERNAME must be set: {e}"))
            }
            (_, Err(e)) => {
                tracing::error!(error = ?e, "WP_APP_PASSWORD missing in environment");
                Err(anyhow::anyhow!("WP_APP_PASSWORD must be set: {e}"))
            }
        }
    }

    fn posts_url(&self, target_id: Option<i64>) -> String {
        match target_id {
            Some(id) => format!("{}/wp-json/wp/v2/posts/{id}", self.base_url),
            None => format!("{}/wp-json/wp/v2/posts", self.base_url),
        }
    }

    fn post(&self, target_id: Option<i64>) -> RequestBuilder {
        self.http
            .post(self.posts_url(target_id))
            .basic_auth(&self.username, Some(&self.app_password))
    }
}

#[async_trait]
impl Publisher for WordPressClient {
    async fn create_post(&self, title: &str, markup: &str) -> Result<i64, UpsertError> {
        tracing::info!(title, bytes = markup.len(), "Creating WordPress post");
        let body = PostBody {
            title,
            content: markup,
            status: Some(self.post_status.as_str()),
        };
        let response = self
            .post(None)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpsertError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "WordPress rejected post creation");
            return Err(status_error(status, None, body));
        }
        let created: CreatedPost = response
            .json()
            .await
            .map_err(|e| UpsertError::Rejected(format!("unexpected create response: {e}")))?;
        tracing::info!(target_id = created.id, "Created WordPress post");
        Ok(created.id)
    }

    async fn update_post(&self, target_id: i64, title: &str, markup: &str) -> Result<(), UpsertError> {
        tracing::info!(target_id, title, bytes = markup.len(), "Updating WordPress post");
        let body = PostBody {
            title,
            content: markup,
            status: None,
        };
        let response = self
            .post(Some(target_id))
            .json(&body)
            .send()
            .await
            .map_err(|e| UpsertError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(target_id, status = status.as_u16(), body = %body, "WordPress update failed");
            return Err(status_error(status, Some(target_id), body));
        }
        Ok(())
    }
}

fn status_error(status: StatusCode, target_id: Option<i64>, body: String) -> UpsertError {
    match (status, target_id) {
        // Trashed-then-deleted posts answer 410 on some installs.
        (StatusCode::NOT_FOUND | StatusCode::GONE, Some(id)) => UpsertError::NotFound(id),
        (s, _) if s.is_server_error() => UpsertError::Unreachable(format!("{status}: {body}")),
        _ => UpsertError::Rejected(format!("{status}: {body}")),
    }
}
