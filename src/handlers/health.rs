use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;
use crate::utils::response::ApiResponse;

#[derive(Serialize, ToSchema)]
pub struct Health {
    pub status: &'static str,
    pub uptime_seconds: u64,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service liveness and uptime")
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<Health>> {
    Json(ApiResponse::success(Health {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}
