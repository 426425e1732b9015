///
/// This module implements the CLI interface for notion-press: command parsing,
/// argument validation and the async entrypoint.
///
/// All conversion and sync logic lives in the [`notion-press-core`] crate.
/// This module only wires the HTTP clients, the mapping store and the
/// orchestrator together, and reports results.
///
/// ## How To Use
/// - Command-line users: run the `notion-press` binary with `--help`.
/// - Programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`notion-press-core`]: ../../notion-press-core/
use crate::load_config::{load_config, CliConfig};
use crate::notion::{normalize_page_id, NotionClient};
use crate::wordpress::WordPressClient;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use notion_press_core::batch::{BatchProcessor, BatchProgress};
use notion_press_core::converter::ConverterRegistry;
use notion_press_core::store::{MappingStore, SqliteMappingStore, SyncStatus};
use notion_press_core::synchronise::{self, SyncOptions, SyncOrchestrator, SyncResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// CLI for notion-press: mirror Notion pages into WordPress posts.
#[derive(Parser)]
#[clap(
    name = "notion-press",
    version,
    about = "Mirror Notion pages into WordPress posts as block markup"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync pages to WordPress. Without --page, every accessible page is synced as a batch
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Page id or Notion URL; repeatable
        #[clap(long = "page")]
        pages: Vec<String>,
        /// Re-sync even if the page is unchanged
        #[clap(long)]
        force: bool,
    },
    /// List recorded page mappings
    Status {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Only show mappings in this state (never_synced, synced, needs_update, syncing, error)
        #[clap(long)]
        status: Option<SyncStatus>,
        /// Result page, starting at 1
        #[clap(long, default_value_t = 1)]
        page: usize,
        #[clap(long, default_value_t = notion_press_core::store::LIST_DEFAULT_PAGE_SIZE)]
        page_size: usize,
    },
    /// Forget the mapping of a page; the WordPress post is kept
    Unmap {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Page id or Notion URL
        #[clap(long)]
        page: String,
    },
}

type Orchestrator = SyncOrchestrator<NotionClient, WordPressClient, SqliteMappingStore>;

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync {
            config,
            pages,
            force,
        } => {
            let config = load_config(config)?;
            tracing::info!(command = "sync", pages = pages.len(), force, "Starting synchronisation");
            let options = SyncOptions { force };
            let orchestrator = Arc::new(build_orchestrator(&config)?);
            if pages.is_empty() {
                sync_everything(orchestrator, &config, options).await
            } else {
                let ids = pages
                    .iter()
                    .map(|raw| parse_page_arg(raw))
                    .collect::<Result<Vec<_>>>()?;
                sync_pages(&orchestrator, &ids, options).await
            }
        }
        Commands::Status {
            config,
            status,
            page,
            page_size,
        } => {
            let config = load_config(config)?;
            let store = open_store(&config)?;
            let total = store.count(status)?;
            let rows = store.list(status, page, page_size)?;
            tracing::info!(command = "status", total, shown = rows.len(), "Listing mappings");
            println!("{total} mapping(s)");
            for row in rows {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    row.source_id,
                    row.status,
                    row.target_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                    row.source_title,
                    row.last_error.unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Unmap { config, page } => {
            let config = load_config(config)?;
            let source_id = parse_page_arg(&page)?;
            let store = open_store(&config)?;
            let removed = synchronise::unmap(store.as_ref(), &source_id, config.sync.syncing_ttl())?;
            if removed {
                println!("Unmapped {source_id}");
            } else {
                println!("No mapping for {source_id}");
            }
            Ok(())
        }
    }
}

fn parse_page_arg(raw: &str) -> Result<String> {
    normalize_page_id(raw).with_context(|| format!("Not a Notion page id or URL: {raw:?}"))
}

fn open_store(config: &CliConfig) -> Result<Arc<SqliteMappingStore>> {
    let path = &config.store.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
    }
    let store = SqliteMappingStore::open(path)
        .with_context(|| format!("Failed to open mapping store {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_orchestrator(config: &CliConfig) -> Result<Orchestrator> {
    let fetcher = NotionClient::new_from_env(&config.source)?;
    let publisher = WordPressClient::new_from_env(&config.target)?;
    let store = open_store(config)?;
    Ok(SyncOrchestrator::new(
        fetcher,
        publisher,
        store,
        Arc::new(ConverterRegistry::with_builtins()),
        config.sync.clone(),
    ))
}

async fn sync_pages(orchestrator: &Orchestrator, ids: &[String], options: SyncOptions) -> Result<()> {
    let mut failed = 0;
    for id in ids {
        let result = orchestrator.sync_one(id, options).await;
        print_result(&result);
        if !result.success() {
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} page(s) failed to sync", ids.len());
    }
    Ok(())
}

fn print_result(result: &SyncResult) {
    let target = result
        .target_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    match &result.error {
        Some(error) => println!("{}\t{}\t{}\t{}", result.source_id, result.outcome, target, error),
        None => println!("{}\t{}\t{}", result.source_id, result.outcome, target),
    }
}

async fn sync_everything(
    orchestrator: Arc<Orchestrator>,
    config: &CliConfig,
    options: SyncOptions,
) -> Result<()> {
    let pages = orchestrator
        .list_pages()
        .await
        .context("Failed to list accessible Notion pages")?;
    let ids: Vec<String> = pages.into_iter().map(|p| p.id).collect();
    let processor = BatchProcessor::new(orchestrator, &config.sync);
    let batch_id = processor.start_batch_with_options(ids, options);

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let done = loop {
        tokio::select! {
            done = processor.wait(batch_id) => break done,
            _ = ticker.tick() => {
                if let Some(progress) = processor.progress(batch_id) {
                    log_progress(&progress);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(%batch_id, "Interrupted, cancelling after the current chunk");
                processor.cancel(batch_id);
            }
        }
    };
    let done = done.context("Batch disappeared before finishing")?;
    log_progress(&done);
    println!(
        "Batch {}: {} ({} synced, {} failed, {} total)",
        done.batch_id, done.status, done.completed_count, done.failed_count, done.total
    );
    if done.failed_count > 0 {
        anyhow::bail!("{} of {} page(s) failed to sync", done.failed_count, done.total);
    }
    Ok(())
}

fn log_progress(progress: &BatchProgress) {
    tracing::info!(
        batch_id = %progress.batch_id,
        status = %progress.status,
        completed = progress.completed_count,
        failed = progress.failed_count,
        total = progress.total,
        "[BATCH] Progress"
    );
}
