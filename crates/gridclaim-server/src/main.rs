//! gridclaim server.
//!
//! This server:
//! - Accepts websocket sessions on /ws and arbitrates cell claims
//! - Broadcasts claims, profile changes and releases to every session
//! - Mirrors state to local files or Cloudflare D1 in the background
//! - Restores the grid from durable storage on startup

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gridclaim_core::{DurableStore, MemoryStore};
use gridclaim_server::{router, AppState, ClaimEngine, Config, PersistenceBridge, StoreKind};
use gridclaim_storage_d1::{D1Client, D1Store};
use gridclaim_storage_local::LocalStore;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let dims = config.dims();

    info!("Starting gridclaim-server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    info!("  Grid: {}x{}", dims.width, dims.height);

    // A store that cannot be opened or read is fatal: serving an empty grid
    // over existing data would overwrite it.
    let store = open_store(&config).await?;
    let snapshot = store
        .load()
        .await
        .context("Failed to load durable state")?;

    let (bridge, worker) = PersistenceBridge::spawn(Arc::clone(&store), config.retry_policy());
    let engine = Arc::new(ClaimEngine::new(dims, bridge, config.outbound_buffer));
    engine.restore(snapshot);

    let app = router(AppState::new(Arc::clone(&engine)));

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Websocket tasks can outlive the server future; end their sessions now
    // so the releases are queued before the bridge stops accepting writes.
    let ended = engine.disconnect_all();
    info!("Ended {} open sessions", ended);

    info!("Flushing pending writes");
    worker.drain().await;
    let metrics = engine.persistence();
    if metrics.failed > 0 {
        warn!("{} writes were not persisted", metrics.failed);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn DurableStore>> {
    match config.store {
        StoreKind::Local => {
            let dir = config.effective_data_dir();
            info!("  Storage: local ({})", dir.display());
            let store = LocalStore::open(&dir)
                .with_context(|| format!("Failed to open local store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
        StoreKind::D1 => {
            let (account_id, api_token, database_id) = config.d1_credentials().context(
                "The d1 store needs CLOUDFLARE_ACCOUNT_ID, CLOUDFLARE_API_TOKEN and D1_DATABASE_ID",
            )?;
            info!("  Storage: Cloudflare D1 ({})", database_id);
            let client = D1Client::new(account_id, api_token.to_string(), database_id);
            let store = D1Store::connect(client)
                .await
                .context("Failed to connect to D1")?;
            Ok(Arc::new(store))
        }
        StoreKind::Memory => {
            warn!("  Storage: memory only, nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        info!("Received SIGTERM, initiating shutdown");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
