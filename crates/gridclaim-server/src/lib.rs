//! Real-time shared grid server.
//!
//! Sessions connect over a websocket, claim cells first-come-first-served,
//! and see every other session's claims and profile changes as they happen.
//! A session's cells are released when it disconnects. State lives in memory
//! and is mirrored to a `DurableStore` by a background worker.

pub mod arbiter;
pub mod board;
pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod handlers;
pub mod hub;
pub mod lifecycle;
pub mod registry;
pub mod ws;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use bridge::{BridgeMetrics, BridgeWorker, PersistenceBridge, RetryPolicy};
pub use config::{Config, StoreKind};
pub use engine::{ClaimEngine, RestoreSummary, DEFAULT_OUTBOUND_BUFFER};
pub use error::{ClaimRejection, ProfileError, ServerError};
pub use handlers::AppState;
pub use hub::Outbound;
pub use lifecycle::SessionLease;

/// Build the HTTP router: the websocket endpoint plus read-only JSON views.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/api/grid", get(handlers::grid_handler))
        .route("/api/blocks/{x}/{y}", get(handlers::block_handler))
        .route("/api/stats", get(handlers::stats_handler))
        .route("/api/colors", get(handlers::colors_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
