use axum::{Router, routing::get};

pub mod async_process;
pub mod queue_items;
pub mod system;

/// Router for the engine endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(system::metrics))
        .nest("/async", async_process::router())
        .nest("/queue-items", queue_items::router())
}
