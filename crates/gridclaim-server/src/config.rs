use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use gridclaim_core::GridDimensions;

use crate::bridge::RetryPolicy;

/// Durable storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// JSON documents on the local filesystem
    Local,
    /// Cloudflare D1 over its HTTP API
    D1,
    /// In-process only, nothing survives a restart
    Memory,
}

/// Configuration for the gridclaim server.
#[derive(Parser, Debug, Clone)]
#[command(name = "gridclaim-server")]
#[command(about = "Real-time shared grid where each cell can be claimed once")]
pub struct Config {
    /// TCP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// TCP port to bind to
    #[arg(long, default_value = "3001", env = "PORT")]
    pub port: u16,

    /// Grid width in cells
    #[arg(long, default_value = "40", env = "GRID_WIDTH")]
    pub grid_width: u32,

    /// Grid height in cells
    #[arg(long, default_value = "20", env = "GRID_HEIGHT")]
    pub grid_height: u32,

    /// Durable storage backend
    #[arg(long, value_enum, default_value = "local", env = "GRIDCLAIM_STORE")]
    pub store: StoreKind,

    /// Data directory for the local backend.
    /// Defaults to the platform data directory + "gridclaim".
    #[arg(long, env = "GRIDCLAIM_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Cloudflare account ID (d1 backend)
    #[arg(long, env = "CLOUDFLARE_ACCOUNT_ID")]
    pub cloudflare_account_id: Option<String>,

    /// Cloudflare API token with D1 access (d1 backend)
    #[arg(long, env = "CLOUDFLARE_API_TOKEN")]
    pub cloudflare_api_token: Option<String>,

    /// D1 database ID (d1 backend)
    #[arg(long, env = "D1_DATABASE_ID")]
    pub d1_database_id: Option<String>,

    /// Retries for a failed durable write before it is dropped
    #[arg(long, default_value = "3", env = "PERSIST_MAX_RETRIES")]
    pub persist_max_retries: u32,

    /// Delay before the first retry, doubled on each attempt
    #[arg(long, default_value = "200", env = "PERSIST_RETRY_BASE_MS")]
    pub persist_retry_base_ms: u64,

    /// Events buffered per session before new ones are dropped
    #[arg(long, default_value = "256", env = "OUTBOUND_BUFFER")]
    pub outbound_buffer: usize,
}

impl Config {
    pub fn dims(&self) -> GridDimensions {
        GridDimensions::new(self.grid_width, self.grid_height)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.persist_max_retries,
            base_delay: Duration::from_millis(self.persist_retry_base_ms),
        }
    }

    /// Get the effective data directory.
    pub fn effective_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("gridclaim")
        })
    }

    /// D1 credentials, if all three are set.
    pub fn d1_credentials(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.cloudflare_account_id.as_deref()?,
            self.cloudflare_api_token.as_deref()?,
            self.d1_database_id.as_deref()?,
        ))
    }
}
