//! Server binary: load configuration, build the scraping stack, serve.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use reddit_ingest::config::Config;
use reddit_ingest::scraper::Scraper;
use reddit_ingest::server;
use reddit_ingest::upstream::UpstreamClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().context("failed to load configuration")?;
    info!(
        proxies = config.proxy_urls.len(),
        base_url = %config.base_url,
        "configuration loaded"
    );

    let upstream = UpstreamClient::new(&config).context("failed to build upstream client")?;
    let scraper = Scraper::new(upstream, &config);

    server::run(&config, Arc::new(scraper)).await
}
