//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::Error;

/// Result alias for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Wrapper turning application errors into JSON responses.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Configuration(_) => StatusCode::BAD_REQUEST,
            Error::DuplicateMapping(_) => StatusCode::CONFLICT,
            Error::SinkApi { .. } | Error::SourceApi(_) | Error::AuthRefreshFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::ReauthRequired { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "API request failed");
        }

        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
