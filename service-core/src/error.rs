use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(err.to_string()),
            ),
            // Missing fields and wrong types come back as 422, broken JSON as 400
            AppError::InvalidBody(rejection) => (
                rejection.status(),
                "Invalid request body".to_string(),
                Some(rejection.body_text()),
            ),
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}
