//! Mock Ollama server answering `/api/generate` with configurable latency and failures.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rand::Rng;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::config::MockServerConfig;

struct MockState {
    config: MockServerConfig,
    requests: AtomicUsize,
}

/// Mock Ollama server for tests and standalone benchmarks
pub struct MockOllamaServer {
    config: MockServerConfig,
    state: Option<Arc<MockState>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    port: u16,
}

impl MockOllamaServer {
    /// Create a new mock server with the given configuration
    pub fn new(config: MockServerConfig) -> Self {
        Self {
            config,
            state: None,
            shutdown_tx: None,
            port: 0,
        }
    }

    /// Start the mock server and return the actual port
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("127.0.0.1:{}", self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        let state = Arc::new(MockState {
            config: self.config.clone(),
            requests: AtomicUsize::new(0),
        });
        self.state = Some(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = Router::new()
            .route("/api/generate", post(handle_generate))
            .route("/api/version", get(handle_version))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(port)
    }

    /// Get the server's URL
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Number of generate requests received so far
    pub fn request_count(&self) -> usize {
        self.state
            .as_ref()
            .map(|s| s.requests.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOllamaServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle /api/generate requests
async fn handle_generate(
    State(state): State<Arc<MockState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let seen = state.requests.fetch_add(1, Ordering::SeqCst);
    let config = &state.config;

    if config.latency_ms > 0 {
        tokio::time::sleep(tokio::time::Duration::from_millis(config.latency_ms)).await;
    }

    let status =
        StatusCode::from_u16(config.error_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if seen < config.fail_first {
        return (status, "Simulated failure").into_response();
    }

    if config.error_rate > 0.0 && rand::thread_rng().gen::<f64>() < config.error_rate {
        return (status, "Simulated error").into_response();
    }

    let mut response = json!({
        "model": body.get("model").cloned().unwrap_or(json!("mock")),
        "created_at": chrono::Utc::now().to_rfc3339(),
        "response": config.response_text,
        "done": true,
    });
    if let Some(n) = config.eval_count {
        response["eval_count"] = json!(n);
    }
    if let Some(n) = config.prompt_eval_count {
        response["prompt_eval_count"] = json!(n);
    }

    (StatusCode::OK, Json(response)).into_response()
}

async fn handle_version() -> Json<serde_json::Value> {
    Json(json!({"version": "mock"}))
}
