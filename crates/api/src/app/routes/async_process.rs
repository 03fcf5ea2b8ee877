//! Receiving end of the engine's fire-and-forget trigger.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use shipq_core::ProcessId;

use crate::app::errors;
use crate::app::services::{self, AppServices};

pub fn router() -> Router {
    Router::new().route("/:guid", get(run_process).post(run_process))
}

/// Answers 202 at once; the process runs on the blocking pool.
pub async fn run_process(
    Extension(services): Extension<Arc<AppServices>>,
    Path(guid): Path<String>,
) -> axum::response::Response {
    let guid: ProcessId = match guid.parse() {
        Ok(guid) => guid,
        Err(err) => return errors::queue_error_to_response(err),
    };

    services::spawn_process(services, guid);
    StatusCode::ACCEPTED.into_response()
}
