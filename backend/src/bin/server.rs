//! Agroneo HTTP server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin agroneo-server
//!
//! # Persistent cache
//! CACHE_BACKEND=sqlite CACHE_PATH=cache.db \
//!   cargo run --bin agroneo-server --features "sqlite-cache,http-server"
//! ```
//!
//! # Environment Variables
//!
//! - `AGRONEO_CONFIG`: path of the TOML configuration file
//! - `HOST` / `PORT`: bind address (default 0.0.0.0:8080)
//! - `CACHE_BACKEND`, `CACHE_PATH`, `GEO_ENDPOINT`, `GEO_API_KEY`,
//!   `LICENSE_ENDPOINT`: configuration overrides
//! - `RUST_LOG`: log level (default: info)

use std::env;
use std::net::SocketAddr;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use agroneo::http::{create_router, AppState};
use agroneo::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    info!("Starting Agroneo HTTP Server");

    let config = AppConfig::load()?;
    let state = AppState::from_config(&config)?;
    info!("Services initialized (cache backend: {})", config.cache.backend);

    let removed = state.cache().clear_old(config.cache.prune_after_days).await;
    if removed > 0 {
        info!(
            "Pruned {} cache entries older than {} days",
            removed, config.cache.prune_after_days
        );
    }

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
