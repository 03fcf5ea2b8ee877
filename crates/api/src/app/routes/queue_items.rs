use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use shipq_core::QueueItemId;

use crate::app::services::{self, AppServices};
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new().route("/:id", get(get_item))
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: QueueItemId = match id.parse() {
        Ok(id) => id,
        Err(err) => return errors::queue_error_to_response(err),
    };

    match services::blocking(services, move |s| s.find_item(id)).await {
        Ok(Ok(Some(item))) => (StatusCode::OK, Json(dto::QueueItemView::from(item))).into_response(),
        Ok(Ok(None)) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("queue item {id} not found")),
        Ok(Err(err)) => errors::queue_error_to_response(err),
        Err(err) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string()),
    }
}
