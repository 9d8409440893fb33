use axum::{
    Router,
    extract::{Json, Query, State},
    response::Json as ResponseJson,
    routing::get,
};

use crate::error::ApiError;
use crate::server::AppState;
use crate::state_structs::{PortfolioQuery, PortfolioResponse, ReplacePortfolioRequest};

/// Stored allocations, optionally restricted to one owner
pub async fn get_portfolio(
    State(state): State<AppState>,
    Query(query): Query<PortfolioQuery>,
) -> Result<ResponseJson<PortfolioResponse>, ApiError> {
    let owner = query.owner.filter(|owner| !owner.trim().is_empty());
    let allocations = state.portfolio.get_allocations(owner.as_deref()).await?;
    Ok(ResponseJson(PortfolioResponse { owner, allocations }))
}

/// Replace an owner's allocations with a new set summing to 100%
pub async fn replace_portfolio(
    State(state): State<AppState>,
    Json(request): Json<ReplacePortfolioRequest>,
) -> Result<ResponseJson<PortfolioResponse>, ApiError> {
    let allocations = state
        .portfolio
        .replace_allocations(&request.owner, request.allocations)
        .await?;
    Ok(ResponseJson(PortfolioResponse {
        owner: Some(request.owner),
        allocations,
    }))
}

pub fn create_routes() -> Router<AppState> {
    Router::new().route("/api/v1/portfolio", get(get_portfolio).put(replace_portfolio))
}
