use axum::{
    Router,
    extract::{Json, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::post,
};
use tracing::{error, info};

use crate::error::ApiError;
use crate::server::AppState;
use crate::services::investments::detect_investment;
use crate::state_structs::{DetectInvestmentRequest, DetectInvestmentResponse, amount_argument};

/// Report a detected investment to the tracking contract
pub async fn detect(
    State(state): State<AppState>,
    Json(request): Json<DetectInvestmentRequest>,
) -> Result<ResponseJson<DetectInvestmentResponse>, ApiError> {
    let address = request.address.trim();
    let amount = amount_argument(&request.amount);
    let (address, amount) = match amount {
        Some(amount) if !address.is_empty() => (address, amount),
        _ => return Err(ApiError::bad_request("Address and amount are required")),
    };

    let chain_writer = state
        .chain_writer
        .as_ref()
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "MultiBaas configuration missing"))?;

    info!(address, amount = %amount, "Calling detectInvestment");
    let result = detect_investment(chain_writer.as_ref(), address, &amount)
        .await
        .map_err(|e| {
            error!("Error calling contract via MultiBaas: {}", e);
            ApiError::internal("Failed to execute contract call").with_details(e.to_string())
        })?;

    Ok(ResponseJson(DetectInvestmentResponse { success: true, result }))
}

pub fn create_routes() -> Router<AppState> {
    Router::new().route("/api/v1/investments/detect", post(detect))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;

    use crate::test_support::{TestApp, send};

    #[tokio::test]
    async fn forwards_to_contract() {
        let app = TestApp::new();
        let (status, body) = send(
            app.router(),
            Method::POST,
            "/api/v1/investments/detect",
            Some(json!({"address": "0xabc", "amount": 250})),
        )
        .await;

        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        let calls = app.chain_writer.method_calls();
        assert_eq!(calls[0].0, "detectInvestment");
        assert_eq!(calls[0].1.args, vec![json!("0xabc"), json!("250")]);
    }

    #[tokio::test]
    async fn requires_address_and_amount() {
        let app = TestApp::new();
        let (status, body) = send(
            app.router(),
            Method::POST,
            "/api/v1/investments/detect",
            Some(json!({"address": "0xabc"})),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Address and amount are required");
    }

    #[tokio::test]
    async fn contract_failure_is_reported_with_details() {
        let app = TestApp::new();
        app.chain_writer.fail_methods("execution reverted");
        let (status, body) = send(
            app.router(),
            Method::POST,
            "/api/v1/investments/detect",
            Some(json!({"address": "0xabc", "amount": "5"})),
        )
        .await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "Failed to execute contract call");
        assert_eq!(body["details"], "execution reverted");
    }
}
