//! shellcache agent entry point.
//!
//! Boots the cache lifecycle for the configured version, then serves the
//! proxy. Logging goes to stderr as JSON.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use shellcache_client::{FetchClient, FetchConfig};
use shellcache_core::{AppConfig, CacheDb, Caches};
use shellcache_server::{Registration, proxy};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(
        generation = %config.cache_name(),
        origin = %config.origin,
        assets = config.manifest.len(),
        "starting shellcache"
    );

    let db = CacheDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening cache store at {}", config.db_path.display()))?;
    let network = FetchClient::new(FetchConfig::from(&config))?;

    let listen_addr = config.listen_addr.clone();
    let registration = Arc::new(Registration::new(config, Caches::new(Arc::new(db)), Arc::new(network)));

    tokio::spawn({
        let registration = Arc::clone(&registration);
        async move { registration.install_with_retry().await }
    });

    let app = proxy::router(registration)?;
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "proxy listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
