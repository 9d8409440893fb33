//! Inbound notifications from the chain API and the log subscription feed.

use axum::{
    Router,
    extract::{Json, State},
    response::Json as ResponseJson,
    routing::post,
};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::server::AppState;
use crate::services::investments::{IntakeOutcome, find_batch_ready};
use crate::state_structs::{LogEventResponse, WebhookAck};

/// Start a swap batch for a `BatchReady` emission.
///
/// Answers before the batch runs; the outcome is only logged.
pub async fn chain_events(State(state): State<AppState>, Json(events): Json<Vec<Value>>) -> ResponseJson<WebhookAck> {
    info!(events = events.len(), "Received chain event webhook");

    let Some(batch) = find_batch_ready(&events) else {
        return ResponseJson(WebhookAck {
            success: false,
            message: "No BatchReady event found".to_string(),
        });
    };
    info!(wallet = %batch.wallet_address, cents = batch.total_amount_cents, "BatchReady event found");

    let engine = state.swap_engine.clone();
    tokio::spawn(async move {
        match engine
            .execute_allocation_swaps(&batch.wallet_address, batch.total_amount_cents)
            .await
        {
            Ok(result) => info!(batch_id = %result.batch_id, results = result.results.len(), "Webhook swap batch finished"),
            Err(e) => error!(wallet = %batch.wallet_address, "Webhook swap batch failed: {}", e),
        }
    });

    ResponseJson(WebhookAck {
        success: true,
        message: "Swap initiated".to_string(),
    })
}

/// Persist an investment log notification once per transaction hash.
///
/// The body is either the event JSON or the raw subscription message.
pub async fn log_events(State(state): State<AppState>, body: String) -> Result<ResponseJson<LogEventResponse>, ApiError> {
    let outcome = state.investments.record_notification(&body).await.inspect_err(|e| {
        warn!("Rejected log notification: {}", e);
    })?;

    let response = match outcome {
        IntakeOutcome::Recorded(event) => LogEventResponse {
            success: true,
            status: "recorded",
            transaction_hash: event.unique_id,
        },
        IntakeOutcome::Duplicate { transaction_hash } => LogEventResponse {
            success: true,
            status: "duplicate",
            transaction_hash,
        },
    };
    Ok(ResponseJson(response))
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/webhooks/chain-events", post(chain_events))
        .route("/api/v1/webhooks/log-events", post(log_events))
}
