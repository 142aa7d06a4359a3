//! Minimal client for the Cloudflare D1 REST query endpoint.

use std::time::Duration;

use gridclaim_core::StorageError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";
const MAX_RETRIES: u32 = 5;
const BASE_DELAY_MS: u64 = 200;

/// D1 query request body.
#[derive(Serialize)]
struct D1QueryRequest<'a> {
    sql: &'a str,
    params: &'a [Value],
}

/// D1 API response structure.
#[derive(Deserialize)]
struct D1Response {
    success: bool,
    result: Option<Vec<D1QueryResult>>,
    errors: Option<Vec<D1Error>>,
}

#[derive(Deserialize)]
struct D1QueryResult {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Deserialize)]
struct D1Error {
    message: String,
}

/// Executes SQL against one D1 database.
pub struct D1Client {
    http: Client,
    query_url: String,
    api_token: String,
}

impl D1Client {
    pub fn new(account_id: &str, api_token: String, database_id: &str) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, account_id, api_token, database_id)
    }

    /// Point the client at a different API root (used by tests).
    pub fn with_api_base(
        api_base: &str,
        account_id: &str,
        api_token: String,
        database_id: &str,
    ) -> Self {
        Self {
            http: Client::new(),
            query_url: format!(
                "{}/accounts/{}/d1/database/{}/query",
                api_base.trim_end_matches('/'),
                account_id,
                database_id
            ),
            api_token,
        }
    }

    /// Execute one statement and return its result rows.
    ///
    /// HTTP 429 responses are retried with exponential backoff.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, StorageError> {
        let body = D1QueryRequest { sql, params };
        let mut delay = Duration::from_millis(BASE_DELAY_MS);
        let mut attempt = 0;

        let response = loop {
            let response = self
                .http
                .post(&self.query_url)
                .header("Authorization", format!("Bearer {}", self.api_token))
                .json(&body)
                .send()
                .await
                .map_err(|e| StorageError::Io(format!("D1 request failed: {}", e)))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                break response;
            }

            if attempt == MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                return Err(StorageError::Backend(format!(
                    "D1 rate limited after {} retries: {}",
                    MAX_RETRIES, text
                )));
            }

            attempt += 1;
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "D1 rate limited (429), retrying"
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StorageError::Io(format!("Failed to read D1 response: {}", e)))?;

        if !status.is_success() {
            return Err(StorageError::Backend(format!(
                "D1 API returned {}: {}",
                status, text
            )));
        }

        let d1_response: D1Response = serde_json::from_str(&text)?;
        if !d1_response.success {
            let error_msg = d1_response
                .errors
                .map(|errs| {
                    errs.into_iter()
                        .map(|e| e.message)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_else(|| "Unknown D1 error".to_string());
            return Err(StorageError::Backend(format!("D1 query failed: {}", error_msg)));
        }

        let rows = d1_response
            .result
            .and_then(|mut r| r.pop())
            .map(|qr| qr.results)
            .unwrap_or_default();
        debug!(rows = rows.len(), "D1 query ok");
        Ok(rows)
    }
}
