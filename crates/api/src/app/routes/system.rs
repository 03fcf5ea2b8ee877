use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode};

use shipq_observability::MetricsSnapshot;

use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> Json<MetricsSnapshot> {
    Json(services.metrics())
}
