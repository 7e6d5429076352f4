use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<tillsync_core::Error> for AppError {
    fn from(error: tillsync_core::Error) -> Self {
        use tillsync_core::Error;
        match error {
            Error::Validation(message) => Self::BadRequest(message),
            Error::NotFound(message) => Self::NotFound(message),
            Error::Conflict(message) | Error::Integrity(message) => Self::Conflict(message),
            Error::ExhaustedRetries(_) => Self::Conflict(error.to_string()),
            Error::TransientApply(message) => Self::Unavailable(message),
            Error::Database(_) | Error::LibSql(_) | Error::Io(_) | Error::Serialization(_) => {
                Self::Internal(error.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_mapping() {
        assert!(matches!(
            AppError::from(tillsync_core::Error::Validation("bad".into())),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            AppError::from(tillsync_core::Error::NotFound("x".into())),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(tillsync_core::Error::TransientApply("busy".into())),
            AppError::Unavailable(_)
        ));
        assert!(matches!(
            AppError::from(tillsync_core::Error::ExhaustedRetries(5)),
            AppError::Conflict(_)
        ));
    }
}
