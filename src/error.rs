//! Error taxonomy shared by the engines and the HTTP boundary

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad model, parameter or body. Never retried automatically.
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },
    #[error("{0} not found")]
    NotFound(String),
    /// The durable store did not answer in time; safe to retry with backoff.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::NotFound(_) => "not_found",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            Self::Internal(err) => {
                tracing::error!(error = ?err, "internal error while handling request");
                "Internal server error".to_string()
            }
            Self::UpstreamUnavailable(detail) => {
                tracing::warn!(detail = %detail, "durable store unavailable");
                self.to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.code().to_string(),
                message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(
            AppError::validation("invalid_days_parameter", "bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("test 4".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::UpstreamUnavailable("timeout".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).code(),
            "internal"
        );
    }

    #[test]
    fn test_validation_code_is_exposed() {
        let err = AppError::validation("invalid_attribution_model", "unknown model 'x'");
        assert_eq!(err.code(), "invalid_attribution_model");
        assert_eq!(err.to_string(), "unknown model 'x'");
    }
}
