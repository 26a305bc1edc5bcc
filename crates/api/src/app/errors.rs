use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use partledger_infra::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    let kind = err.kind();
    match err {
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, kind, msg),
        ServiceError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, kind, msg),
        ServiceError::InvalidStateTransition(msg) => json_error(StatusCode::CONFLICT, kind, msg),
        ServiceError::ConcurrencyConflict(msg) => json_error(StatusCode::CONFLICT, kind, msg),
        ServiceError::InsufficientStock(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, kind, msg)
        }
        ServiceError::Storage(msg) => {
            error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, kind, "internal storage error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_id(what: &str) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
}

/// Malformed JSON body or query string.
pub fn bad_request_body(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}
