use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::clients::RealtimeToken;
use crate::state::AppState;
use crate::utils::response::{ApiError, ApiResponse};

#[derive(Deserialize, ToSchema)]
pub struct MintToken {
    /// Channels the token grants access to; defaults to the wildcard.
    pub channels: Option<Vec<String>>,
}

#[utoipa::path(
    post,
    path = "/events/token",
    responses(
        (status = 200, description = "Short-lived capability token for the realtime event stream")
    ),
    security(("api_key" = []))
)]
pub async fn mint_token(
    State(state): State<AppState>,
    Json(body): Json<MintToken>,
) -> Result<Json<ApiResponse<RealtimeToken>>, ApiError> {
    let Some(bus) = &state.realtime else {
        return Err(ApiError::BadRequest("Realtime bus is not configured".into()));
    };
    let channels = body.channels.unwrap_or_else(|| vec!["*".to_string()]);
    let token = bus
        .mint_token(&channels)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(ApiResponse::success(token)))
}
