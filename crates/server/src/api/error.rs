//! # API Errors
//!
//! Maps the engine's error taxonomy onto HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pressroom_core::EngineError;
use serde::Serialize;
use utoipa::ToSchema;

/// Body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            EngineError::SessionNotFound(_)
            | EngineError::VersionNotFound { .. }
            | EngineError::KeyNotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidParameters(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::SessionClosed(_) => StatusCode::GONE,
            EngineError::Reasoning(_) | EngineError::Publishing(_) => StatusCode::BAD_GATEWAY,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pressroom_core::{Operation, SessionStatus};

    #[test]
    fn test_status_mapping() {
        let conflict = ApiError(EngineError::InvalidTransition {
            operation: Operation::Publish,
            required: "ready_for_review".to_string(),
            actual: SessionStatus::Created,
        });
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError(EngineError::VersionNotFound {
                session_id: "s".into(),
                version: 4
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(EngineError::InvalidParameters("x".into())).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError(EngineError::SessionClosed("s".into())).status(), StatusCode::GONE);
        assert_eq!(ApiError(EngineError::Reasoning("x".into())).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError(EngineError::Storage("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
