use anyhow::Result;
use clap::Parser;
use notion_press::cli::{run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // NOTION_TOKEN and the WordPress password are usually kept in .env.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = run(cli).await;
    match &result {
        Ok(()) => tracing::info!("notion-press finished"),
        Err(e) => tracing::error!(error = %e, "notion-press failed"),
    }
    result
}
