use axum::{Router, extract::State, http::StatusCode, response::Json, routing::get};
use serde_json::json;

use crate::server::AppState;
use crate::state_structs::HealthResponse;

/// Liveness endpoint handler.
///
/// # Route
/// - **Method**: GET
/// - **Path**: `/ping`
/// - **Response**: `{"status": "pong"}`
///
/// Does no I/O, so load balancers can poll it freely.
pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "pong" }))
}

/// Readiness endpoint handler.
///
/// Reports `503` when the database does not answer; missing optional
/// upstreams are reported but do not fail the check.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_up = match state.store.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Database health check failed: {:#}", e);
            false
        }
    };

    let response = HealthResponse {
        status: if database_up { "ok" } else { "degraded" },
        database: if database_up { "up" } else { "down" },
        chain_writer_configured: state.chain_writer.is_some(),
        chat_backend_configured: state.chat.is_configured(),
    };
    let status = if database_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

pub fn create_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
