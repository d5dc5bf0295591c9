use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(_) | AppError::OpenAI(_) => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Timeout(msg) => Self::UpstreamTimeout(msg),
            // The message names the offending setting and is user-safe.
            AppError::Configuration(msg) => {
                tracing::error!("Configuration error: {msg}");
                Self::ConfigurationError(msg)
            }
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    status: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) | Self::ConfigurationError(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::UpstreamTimeout(message) => (StatusCode::GATEWAY_TIMEOUT, message),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_keep_their_message() {
        let mapped = ApiError::from(AppError::Configuration(
            "model 'gpt-9' was rejected by the API; check the `chat_model` setting".to_string(),
        ));
        match mapped {
            ApiError::ConfigurationError(message) => {
                assert!(message.contains("chat_model"));
            }
            other => panic!("expected ConfigurationError, got {other:?}"),
        }
    }

    #[test]
    fn database_errors_become_opaque() {
        let mapped = ApiError::from(AppError::InternalError("connection pool drained".into()));
        assert!(matches!(mapped, ApiError::InternalError(message) if message == "Internal server error"));
    }

    #[tokio::test]
    async fn configuration_errors_surface_as_500_with_body() {
        let response =
            ApiError::ConfigurationError("check the `embedding_model` setting".to_string())
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert!(body["error"]
            .as_str()
            .is_some_and(|message| message.contains("embedding_model")));
    }
}
