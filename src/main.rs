//! Busline service entry point.
//!
//! Wires the in-process store, the Google Routes connector, and the segment
//! engine together and serves the HTTP API. The store and provider are
//! constructed here and injected; nothing in the stack reaches for process
//! globals.

mod config;
mod http;

use anyhow::Result;
use google_routes::GoogleRoutes;
use routeplan::{MemoryStore, SegmentEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let store = MemoryStore::new();
    let provider = GoogleRoutes::new(
        config.google_endpoint.as_str(),
        config.google_api_key.as_str(),
        config.provider_timeout,
    )?;
    let engine = SegmentEngine::new(store, provider);

    let app = http::router(engine);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "busline listening");
    axum::serve(listener, app).await?;
    Ok(())
}
