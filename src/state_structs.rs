// Request and response bodies of the HTTP API.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::AllocationEntry;
use crate::services::SwapResult;

/// Parse an amount sent either as a JSON number or a numeric string
pub fn amount_from_json(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Same as [`amount_from_json`] but keeps the decimal text for contract arguments
pub fn amount_argument(value: &Value) -> Option<String> {
    amount_from_json(value).map(|amount| amount.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSwapRequest {
    #[serde(default)]
    pub wallet_address: String,
    /// Deposit in fiat cents
    #[serde(default)]
    pub amount: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSwapResponse {
    pub success: bool,
    pub batch_id: Uuid,
    pub results: Vec<SwapResult>,
}

#[derive(Debug, Deserialize)]
pub struct PortfolioQuery {
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplacePortfolioRequest {
    pub owner: String,
    pub allocations: Vec<AllocationEntry>,
}

#[derive(Debug, Serialize)]
pub struct PortfolioResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub allocations: Vec<AllocationEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DetectInvestmentRequest {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub amount: Value,
}

#[derive(Debug, Serialize)]
pub struct DetectInvestmentResponse {
    pub success: bool,
    pub result: Value,
}

/// Acknowledgement returned to webhook senders
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEventResponse {
    pub success: bool,
    /// `recorded` or `duplicate`
    pub status: &'static str,
    pub transaction_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: Option<Uuid>,
    pub message: String,
    #[serde(default)]
    pub tool_defaults: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub chain_writer_configured: bool,
    pub chat_backend_configured: bool,
}
