use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shipq_api::app::build_app;
use shipq_api::app::services::{self, AppServices};
use shipq_core::{HttpMethod, QueueConfig, QueueItemId};
use shipq_infra::Engine;
use shipq_tasks::{Task, TaskContext, TaskError};

#[derive(Debug, Serialize, Deserialize)]
struct PrintLabel {
    order: String,
}

impl Task for PrintLabel {
    fn task_type(&self) -> &'static str {
        "PrintLabel"
    }

    fn to_payload(&self) -> Result<JsonValue, TaskError> {
        Ok(serde_json::to_value(self)?)
    }

    fn execute(&mut self, ctx: &mut dyn TaskContext) -> Result<(), TaskError> {
        ctx.report_progress(5_000)?;
        ctx.report_alive()?;
        Ok(())
    }
}

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // The engine must call back into this very server, so bind first.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let config = QueueConfig::default()
            .with_async_process(HttpMethod::Post, format!("{base_url}/async/{{guid}}"))
            .with_wakeup_delay(Duration::from_millis(20));
        let engine = Engine::builder(config)
            .register::<PrintLabel>("PrintLabel")
            .build()
            .unwrap();
        let services = Arc::new(AppServices::new(engine));

        let app = build_app(services.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn get_item_eventually(client: &reqwest::Client, base_url: &str, id: QueueItemId, status: &str) -> JsonValue {
    // The runner chain is asynchronous end to end; poll until the item settles.
    for _ in 0..100 {
        let res = client
            .get(format!("{}/queue-items/{}", base_url, id))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body: JsonValue = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("queue item {id} did not reach {status} in time");
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn enqueued_item_completes_through_the_http_wakeup_chain() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let item = services::blocking(server.services.clone(), |s| {
        s.engine().queue().enqueue(
            "labels",
            &PrintLabel {
                order: "#1001".to_string(),
            },
            "shop-1",
        )
    })
    .await
    .unwrap()
    .unwrap();

    let body = get_item_eventually(&client, &server.base_url, item.id, "completed").await;
    assert_eq!(body["task_type"], "PrintLabel");
    assert_eq!(body["queue_name"], "labels");
    assert_eq!(body["progress_percent"], 100.0);

    let metrics: JsonValue = client
        .get(format!("{}/metrics", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(metrics["enqueued"].as_u64().unwrap() >= 1);
    assert!(metrics["completed"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn queue_item_lookup_rejects_unknown_and_malformed_ids() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/queue-items/{}", server.base_url, QueueItemId::new()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/queue-items/not-a-uuid", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn async_endpoint_accepts_immediately() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let unknown = shipq_core::ProcessId::new();
    let res = client
        .post(format!("{}/async/{}", server.base_url, unknown))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client
        .get(format!("{}/async/{}", server.base_url, unknown))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let res = client
        .post(format!("{}/async/garbage", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
