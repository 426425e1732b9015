/// `load_config` module: loads the static YAML config file for the CLI.
///
/// The file holds only non-secret settings. Credentials are read from the
/// environment by the HTTP clients themselves (`NOTION_TOKEN`, `WP_USERNAME`,
/// `WP_APP_PASSWORD`), optionally through a `.env` file.
///
/// # Accepted schema
/// ```yaml
/// source:                     # optional
///   base_url: https://api.notion.com
///   notion_version: "2022-06-28"
///   timeout_secs: 30
/// target:
///   base_url: https://blog.example.com
///   post_status: draft        # draft | publish | pending | private
///   timeout_secs: 30
/// store:
///   path: ./notion-press.db
/// sync:                       # optional, every key defaults
///   max_depth: 3
///   chunk_size: 10
///   chunk_stagger_ms: 500
///   workers: 4
///   syncing_ttl_secs: 600
///   retry:
///     max_attempts: 4
/// ```
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use notion_press_core::config::SyncConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const DEFAULT_NOTION_BASE_URL: &str = "https://api.notion.com";
pub const DEFAULT_NOTION_VERSION: &str = "2022-06-28";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub source: SourceSection,
    pub target: TargetSection,
    pub store: StoreSection,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    #[serde(default = "default_notion_base_url")]
    pub base_url: String,
    #[serde(default = "default_notion_version")]
    pub notion_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            base_url: default_notion_base_url(),
            notion_version: default_notion_version(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetSection {
    pub base_url: String,
    #[serde(default)]
    pub post_status: PostStatus,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Status given to newly created posts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Draft,
    Publish,
    Pending,
    Private,
}

impl PostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Publish => "publish",
            PostStatus::Pending => "pending",
            PostStatus::Private => "private",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub path: PathBuf,
}

fn default_notion_base_url() -> String {
    DEFAULT_NOTION_BASE_URL.to_string()
}

fn default_notion_version() -> String {
    DEFAULT_NOTION_VERSION.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl CliConfig {
    pub fn trace_loaded(&self) {
        info!(
            source = %self.source.base_url,
            target = %self.target.base_url,
            post_status = self.target.post_status.as_str(),
            store = %self.store.path.display(),
            "Loaded CliConfig"
        );
        self.sync.trace_loaded();
    }
}

/// Loads and validates the YAML config at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let config: CliConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;

    validate(&config).with_context(|| format!("Invalid config file {}", path_ref.display()))?;
    config.trace_loaded();
    Ok(config)
}

fn validate(config: &CliConfig) -> Result<()> {
    for (name, url) in [
        ("source.base_url", &config.source.base_url),
        ("target.base_url", &config.target.base_url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("{name} must be an http(s) URL, got {url:?}");
        }
    }
    if config.sync.chunk_size == 0 {
        anyhow::bail!("sync.chunk_size must be at least 1");
    }
    if config.sync.workers == 0 {
        anyhow::bail!("sync.workers must be at least 1");
    }
    Ok(())
}
