//! # Error Types
//!
//! Typed errors shared by the services and the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::chat::ChatError;
use crate::clients::ClientError;
use crate::services::investments::IntakeError;
use crate::services::portfolio::PortfolioError;

/// Errors that abort a whole swap batch before any allocation is attempted
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("{0}")]
    Configuration(String),

    #[error("invalid swap request: {0}")]
    InvalidRequest(String),

    #[error("No portfolio allocations found")]
    EmptyPortfolio,

    /// Stored allocations do not add up to a whole deposit
    #[error("{0}")]
    InvalidPortfolio(String),

    #[error("Failed to fetch portfolio data: {0:#}")]
    Store(anyhow::Error),

    #[error("Failed to price deposit: {0}")]
    Pricing(String),

    #[error("Failed to fetch native asset price: {0}")]
    PriceOracle(#[from] ClientError),
}

/// JSON error body returned by every handler
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Handler error carrying the status code to answer with
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse { error: error.into(), details: None },
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.body.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SwapError> for ApiError {
    fn from(err: SwapError) -> Self {
        let status = match &err {
            SwapError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SwapError::EmptyPortfolio | SwapError::InvalidPortfolio(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SwapError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            SwapError::PriceOracle(_) | SwapError::Pricing(_) => StatusCode::BAD_GATEWAY,
            SwapError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<PortfolioError> for ApiError {
    fn from(err: PortfolioError) -> Self {
        match err {
            PortfolioError::Store(e) => {
                ApiError::internal("Failed to manage token allocation").with_details(format!("{e:#}"))
            }
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::Store(e) => {
                ApiError::internal("Failed to persist investment event").with_details(format!("{e:#}"))
            }
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
            ChatError::Backend(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        ApiError::new(StatusCode::BAD_GATEWAY, "Upstream call failed").with_details(err.to_string())
    }
}
