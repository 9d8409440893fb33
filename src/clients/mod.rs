//! # External Clients
//!
//! HTTP clients for the third-party services the server glues together.
//! Each service sits behind an `async_trait` so the orchestrator and the
//! route handlers can run against in-memory doubles.

pub mod aggregator;
pub mod chain_writer;
pub mod chat_backend;
pub mod minter;
pub mod price_oracle;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde_json::Value;

pub use aggregator::{AggregatorClient, SwapAggregator, SwapQuote, SwapQuoteRequest, UnsignedTx};
pub use chain_writer::{ChainWriter, MethodCall, MultiBaasClient};
pub use chat_backend::{ChatBackend, ChatBackendClient, ChatByteStream};
pub use minter::{HttpLoyaltyMinter, LoyaltyMinter};
pub use price_oracle::{CoinGeckoOracle, FixedRateOracle, PriceOracle};

/// Failure talking to an external service
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Build the shared outbound HTTP client
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Pass successful responses through; turn error statuses into `ClientError::Upstream`.
///
/// The message prefers the body's `error` field, then `description`, then the
/// raw body, then the status line.
pub(crate) async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Upstream {
        status: status.as_u16(),
        message: upstream_message(status.as_u16(), &body),
    })
}

fn upstream_message(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        for key in ["error", "description", "message"] {
            match json.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return other.to_string(),
            }
        }
    }
    if body.trim().is_empty() {
        format!("upstream returned status {status}")
    } else {
        body.trim().to_string()
    }
}
