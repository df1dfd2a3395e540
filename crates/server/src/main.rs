//! snapcache entry point.
//!
//! Loads the configuration, opens the cache under `location`, keeps every
//! configured service refreshed on its schedule and logs each cache event.
//! Logging goes to stderr as JSON. Runs until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use snapcache_client::{FetchConfig, HttpFetcher};
use snapcache_core::{CacheConfig, CacheEvent, HttpCache};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = CacheConfig::load().context("loading configuration")?;
    tracing::info!(
        location = %config.location.display(),
        services = config.services.len(),
        "starting snapcache"
    );

    let fetcher = HttpFetcher::new(FetchConfig::default())?;
    let cache = HttpCache::open(config, Arc::new(fetcher)).await.context("opening cache")?;

    let mut events = cache.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => tracing::warn!(missed, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    cache.start().await?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");

    cache.stop().await?;
    drop(cache);
    let _ = logger.await;

    Ok(())
}

fn log_event(event: &CacheEvent) {
    match event {
        CacheEvent::UpdateData { name, data } => {
            tracing::info!(event = event.kind(), source = %name, records = data.len(), "source updated");
        }
        CacheEvent::UpdateError { name, error } => {
            tracing::error!(event = event.kind(), source = %name, error = %error, "source update failed");
        }
        CacheEvent::GetData { name, data } => {
            tracing::debug!(event = event.kind(), source = %name, records = data.len(), "lookup served");
        }
        CacheEvent::GetError { name, error } => {
            tracing::warn!(event = event.kind(), source = %name, error = %error, "lookup failed");
        }
    }
}
