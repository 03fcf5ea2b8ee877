use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use shipq_core::QueueError;

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::SaveConflict(msg) | QueueError::LeaseConflict(msg) => {
            json_error(StatusCode::CONFLICT, "conflict", msg)
        }
        QueueError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        QueueError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        QueueError::IllegalTransition { .. } => {
            json_error(StatusCode::CONFLICT, "illegal_transition", err.to_string())
        }
        QueueError::Deserialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        QueueError::StorageUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", msg)
        }
        QueueError::Execution(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "execution_error", msg),
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
