use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use waypost_domain::DomainError;

/// HTTP-facing error wrapper. Storage failures are logged in full and
/// returned opaque.
pub enum ApiError {
    Unauthorized,
    Domain(DomainError),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Domain(err) => match &err {
                DomainError::ValidationError(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                DomainError::BatchTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
                }
                DomainError::RepositoryError(inner) => {
                    error!(error = %inner, "repository failure serving request");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "storage unavailable".to_string(),
                    )
                }
                _ => {
                    error!(error = %err, "unexpected failure serving request");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_string(),
                    )
                }
            },
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
