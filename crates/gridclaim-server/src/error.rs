//! Error types for the engine and the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gridclaim_core::StorageError;
use serde::Serialize;

/// Why a claim was not accepted. Never a system fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimRejection {
    #[error("Invalid coordinates")]
    OutOfBounds { x: i64, y: i64 },

    #[error("Block already claimed")]
    AlreadyOwned { x: i64, y: i64 },

    #[error("Unknown session")]
    UnknownSession,
}

/// Rejected profile update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Color is not in the palette")]
    InvalidColor,

    #[error("Unknown session")]
    UnknownSession,
}

/// Errors surfaced by the HTTP endpoints and startup.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid coordinates")]
    OutOfBounds,

    #[error("Block is not claimed")]
    NotClaimed,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
        }

        let (status, code) = match &self {
            ServerError::OutOfBounds => (StatusCode::BAD_REQUEST, "OUT_OF_BOUNDS"),
            ServerError::NotClaimed => (StatusCode::NOT_FOUND, "NOT_CLAIMED"),
            ServerError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
