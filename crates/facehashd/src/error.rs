use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error returned from HTTP handlers. Bodies are `{"detail": "..."}`.
#[derive(Debug)]
pub enum AppError {
    /// Caller's input was unusable; the message is returned verbatim.
    BadRequest(String),
    /// Request rejected with a specific client-error status (e.g. 413).
    Rejected(StatusCode, String),
    /// Server-side failure; the message is logged, the caller sees a generic one.
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Rejected(status, msg) => (status, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
