use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{
    event_notifications::EventNotificationError, tree_growth::ActivityValidationError,
};
use thiserror::Error;
use tracing::error;

use crate::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("member not found: {0}")]
    MemberNotFound(String),
    #[error("invalid activity: {0}")]
    Validation(#[from] ActivityValidationError),
    #[error(transparent)]
    EventNotification(#[from] EventNotificationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MemberNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("api error: {}", self);
        }

        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}
