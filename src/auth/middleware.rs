use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::auth::{ApiKeyGuard, API_KEY_HEADER};
use crate::utils::response::ApiError;

pub async fn auth_middleware(
    State(guard): State<Arc<ApiKeyGuard>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    match presented {
        Some(key) if guard.verify(key) => Ok(next.run(req).await),
        _ => Err(ApiError::Unauthorized),
    }
}
