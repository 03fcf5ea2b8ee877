use shipq_api::app::{self, services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shipq_observability::init();

    let bind_addr = std::env::var("SHIPQ_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let services = services::build_services_from_env().await?;

    // Pick up work left queued by a previous process.
    services::wakeup(services.clone()).await;

    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind listen address");

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
    Ok(())
}
