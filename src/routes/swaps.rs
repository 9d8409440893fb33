use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
};
use tracing::info;
use uuid::Uuid;

use crate::database::SwapSaga;
use crate::error::ApiError;
use crate::server::AppState;
use crate::services::swap_engine::ResumeReport;
use crate::state_structs::{ProcessSwapRequest, ProcessSwapResponse, amount_from_json};

/// Swap a deposit into the stored portfolio allocations
pub async fn process_swap(
    State(state): State<AppState>,
    Json(request): Json<ProcessSwapRequest>,
) -> Result<ResponseJson<ProcessSwapResponse>, ApiError> {
    let amount = amount_from_json(&request.amount).filter(|cents| *cents > 0);
    let (wallet_address, amount) = match (request.wallet_address.trim(), amount) {
        (wallet, Some(amount)) if !wallet.is_empty() => (wallet.to_string(), amount),
        _ => return Err(ApiError::bad_request("Missing required parameters")),
    };
    info!(wallet = %wallet_address, cents = amount, "Processing swap request");

    let batch = state
        .swap_engine
        .execute_allocation_swaps(&wallet_address, amount)
        .await?;

    Ok(ResponseJson(ProcessSwapResponse {
        success: true,
        batch_id: batch.batch_id,
        results: batch.results,
    }))
}

/// Pick up sagas an earlier run left incomplete
pub async fn resume_swaps(State(state): State<AppState>) -> Result<ResponseJson<ResumeReport>, ApiError> {
    let report = state.swap_engine.resume_incomplete().await?;
    Ok(ResponseJson(report))
}

/// Saga state of one batch
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<ResponseJson<Vec<SwapSaga>>, ApiError> {
    let sagas = state.swap_engine.batch_sagas(batch_id).await?;
    if sagas.is_empty() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, format!("Batch {batch_id} not found")));
    }
    Ok(ResponseJson(sagas))
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/swaps/process", post(process_swap))
        .route("/api/v1/swaps/resume", post(resume_swaps))
        .route("/api/v1/swaps/{batch_id}", get(get_batch))
}
