use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
};
use uuid::Uuid;

use crate::chat::{ChatReply, ChatTranscript};
use crate::error::ApiError;
use crate::server::AppState;
use crate::state_structs::ChatRequest;

/// Send a message and return the assistant's decoded reply
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<ResponseJson<ChatReply>, ApiError> {
    let reply = state
        .chat
        .relay(request.session_id, &request.message, &request.tool_defaults)
        .await?;
    Ok(ResponseJson(reply))
}

pub async fn get_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<ResponseJson<ChatTranscript>, ApiError> {
    state
        .chat
        .transcript(session_id)
        .map(ResponseJson)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Chat session not found"))
}

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/chat", post(send_message))
        .route("/api/v1/chat/{session_id}", get(get_transcript))
}
