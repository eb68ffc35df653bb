use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::RegistryError;

#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse<()> {
    pub fn message(message: &str) -> Self {
        ApiResponse {
            success: true,
            data: None,
            message: Some(message.to_string()),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ApiFailure {
    pub success: bool,
    pub error: String,
}

pub enum ApiError {
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };

        let body = Json(ApiFailure {
            success: false,
            error,
        });
        (status, body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::AlreadyRegistered(_) => ApiError::Conflict(e.to_string()),
            RegistryError::InvalidSource(_) => ApiError::BadRequest(e.to_string()),
            RegistryError::NotFound => ApiError::NotFound("Series not found".into()),
            RegistryError::Database(err) => ApiError::Internal(err.to_string()),
        }
    }
}
