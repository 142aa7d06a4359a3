//! HTTP handlers.
//!
//! Implements:
//! - GET /health - Liveness plus session and persistence counters
//! - GET /api/grid - Snapshot of every claimed cell
//! - GET /api/blocks/{x}/{y} - One cell
//! - GET /api/stats - Totals and leaderboard
//! - GET /api/colors - The color palette

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use gridclaim_core::{palette, Cell, GridDimensions, Stats};
use serde::Serialize;

use crate::bridge::BridgeMetrics;
use crate::engine::ClaimEngine;
use crate::error::{Result, ServerError};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ClaimEngine>,
}

impl AppState {
    pub fn new(engine: Arc<ClaimEngine>) -> Self {
        Self { engine }
    }
}

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub connected_sessions: usize,
    pub backend: &'static str,
    pub dropped_events: u64,
    pub persistence: BridgeMetrics,
}

/// GET /health - Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = &state.engine;
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
        connected_sessions: engine.live_sessions(),
        backend: engine.persistence_backend(),
        dropped_events: engine.dropped_events(),
        persistence: engine.persistence(),
    })
}

#[derive(Serialize)]
pub struct GridResponse {
    pub dimensions: GridDimensions,
    pub blocks: Vec<Cell>,
}

/// GET /api/grid
pub async fn grid_handler(State(state): State<AppState>) -> Json<GridResponse> {
    Json(GridResponse {
        dimensions: state.engine.dims(),
        blocks: state.engine.snapshot(),
    })
}

/// GET /api/blocks/{x}/{y}
pub async fn block_handler(
    State(state): State<AppState>,
    Path((x, y)): Path<(i64, i64)>,
) -> Result<Json<Cell>> {
    let coord = state
        .engine
        .dims()
        .coord(x, y)
        .ok_or(ServerError::OutOfBounds)?;
    state
        .engine
        .cell(coord)
        .map(Json)
        .ok_or(ServerError::NotClaimed)
}

/// GET /api/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<Stats> {
    Json(state.engine.stats())
}

#[derive(Serialize)]
pub struct ColorsResponse {
    pub colors: &'static [&'static str],
}

/// GET /api/colors
pub async fn colors_handler() -> Json<ColorsResponse> {
    Json(ColorsResponse {
        colors: &palette::PALETTE,
    })
}
