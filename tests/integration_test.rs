// Integration tests for Ollama Bench
//
// These tests drive the full HTTP stack (routing, middleware, request
// parsing, response formatting) against a mock Ollama server.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use ollama_bench::{
    bench::{LoadGenerator, MockOllamaServer, MockServerConfig},
    config::Config,
    http_client::{InferenceEndpoint, OllamaHttpClient},
    middleware,
    routes::{self, AppState},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

/// Start a mock Ollama server and return it with its port
async fn start_mock_ollama(config: MockServerConfig) -> (MockOllamaServer, u16) {
    let mut server = MockOllamaServer::new(config);
    let port = server.start().await.expect("Failed to start mock server");
    (server, port)
}

/// Port with nothing listening on it
fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Create a test application state pointed at `port`
fn create_test_app_state(port: u16, max_retries: u32) -> AppState {
    let config = Arc::new(Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 5000,
        ollama_host: "127.0.0.1".to_string(),
        ollama_port: port,
        default_model: "mistral".to_string(),
        http_max_connections: 64,
        http_connect_timeout: 5,
        request_timeout: 10,
        max_retries,
        worker_pool_size: 16,
        run_timeout: 60,
        max_units: 1_000,
        pushgateway_url: None,
        pushgateway_job: "ollama_benchmark".to_string(),
        log_level: "info".to_string(),
        log_json: false,
    });

    let http_client = Arc::new(
        OllamaHttpClient::new(
            InferenceEndpoint::new("127.0.0.1", port),
            config.http_max_connections,
            config.http_connect_timeout,
            config.request_timeout,
            config.max_retries,
        )
        .expect("Failed to create HTTP client")
        .with_base_delay(Duration::from_millis(10)),
    );

    let generator = Arc::new(LoadGenerator::new(
        http_client,
        config.load_generator_config(),
    ));

    AppState { config, generator }
}

/// Build the test application router
fn build_test_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::benchmark_routes(state))
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(middleware::cors_layer())
}

/// Helper to parse JSON response body
async fn parse_json_body(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ==================================================================================================
// Health Check Tests
// ==================================================================================================

#[tokio::test]
async fn test_root_endpoint() {
    let app = build_test_app(create_test_app_state(11434, 0));

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_test_app(create_test_app_state(11434, 0));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["ollama_host"], "127.0.0.1:11434");
    assert!(body["timestamp"].is_string());
}

// ==================================================================================================
// Benchmark Tests
// ==================================================================================================

#[tokio::test]
async fn test_benchmark_clients_end_to_end() {
    let (server, port) = start_mock_ollama(MockServerConfig {
        latency_ms: 500,
        response_text: "ok ok ok".to_string(),
        eval_count: Some(3),
        ..Default::default()
    })
    .await;
    let app = build_test_app(create_test_app_state(port, 0));

    let response = app
        .oneshot(post_json(
            "/benchmark",
            json!({"n_clients": 2, "n_requests_per_client": 3, "prompt": "hi", "model": "mistral"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;

    assert_eq!(body["total"], 6);
    assert_eq!(body["successful"], 6);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["results"].as_array().unwrap().len(), 6);
    assert!(body["run_id"].is_string());

    // 3 tokens in ~0.5s, plus loopback overhead
    let avg_request_time = body["avg_request_time"].as_f64().unwrap();
    assert!(
        (0.5..0.8).contains(&avg_request_time),
        "avg_request_time = {}",
        avg_request_time
    );
    let avg_tps = body["avg_tps"].as_f64().unwrap();
    assert!(avg_tps > 3.75 && avg_tps <= 6.0, "avg_tps = {}", avg_tps);

    // Two clients of three sequential 0.5s requests run side by side
    let duration = body["total_duration"].as_f64().unwrap();
    assert!(duration >= 1.5 && duration < 2.9, "duration = {}", duration);

    assert_eq!(server.request_count(), 6);
}

#[tokio::test]
async fn test_benchmark_flat_sequential_all_failing() {
    let (_server, port) = start_mock_ollama(MockServerConfig {
        latency_ms: 0,
        error_rate: 1.0,
        ..Default::default()
    })
    .await;
    let app = build_test_app(create_test_app_state(port, 0));

    let response = app
        .oneshot(post_json(
            "/benchmark",
            json!({"num_queries": 5, "parallel": false}),
        ))
        .await
        .unwrap();

    // A run with no successes is still a completed run
    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;

    assert_eq!(body["successful"], 0);
    assert_eq!(body["failed"], 5);
    assert_eq!(body["avg_tps"], 0.0);
    assert_eq!(body["avg_request_time"], 0.0);
    assert_eq!(body["failures_by_kind"]["unreachable"], 5);

    let results = body["results"].as_array().unwrap();
    assert!(results
        .iter()
        .all(|r| r["status"] == "failure" && r["error_kind"] == "unreachable"));
}

#[tokio::test]
async fn test_benchmark_flat_parallel_tags_positions() {
    let (_server, port) = start_mock_ollama(MockServerConfig {
        latency_ms: 20,
        ..Default::default()
    })
    .await;
    let app = build_test_app(create_test_app_state(port, 0));

    let response = app
        .oneshot(post_json("/benchmark", json!({"num_queries": 4})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;
    let positions: Vec<(u64, u64)> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| {
            (
                r["client_index"].as_u64().unwrap(),
                r["request_index"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(positions, vec![(0, 0), (1, 0), (2, 0), (3, 0)]);
}

#[tokio::test]
async fn test_benchmark_default_model_is_used() {
    let (_server, port) = start_mock_ollama(MockServerConfig {
        latency_ms: 0,
        ..Default::default()
    })
    .await;
    let app = build_test_app(create_test_app_state(port, 0));

    // Query parameters of the old per-job client script
    let response = app
        .oneshot(post_json(
            "/benchmark",
            json!({
                "service": "inference",
                "n_clients": 1,
                "n_requests_per_client": 2,
                "prompt": "tell me how internet was born?"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["successful"], 2);
}

#[tokio::test]
async fn test_benchmark_rejects_non_positive_counts() {
    let (server, port) = start_mock_ollama(MockServerConfig::default()).await;
    let app = build_test_app(create_test_app_state(port, 0));

    let response = app
        .oneshot(post_json(
            "/benchmark",
            json!({"n_clients": 0, "n_requests_per_client": 3}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["error"]["type"], "invalid_shape");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("n_clients"));

    // Nothing was dispatched
    assert_eq!(server.request_count(), 0);
}

#[tokio::test]
async fn test_benchmark_rejects_negative_queries() {
    let app = build_test_app(create_test_app_state(unused_port(), 0));

    let response = app
        .oneshot(post_json("/benchmark", json!({"num_queries": -2})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["error"]["type"], "invalid_shape");
}

#[tokio::test]
async fn test_benchmark_rejects_overflowing_unit_count() {
    let (server, port) = start_mock_ollama(MockServerConfig::default()).await;
    let app = build_test_app(create_test_app_state(port, 0));

    let response = app
        .oneshot(post_json(
            "/benchmark",
            json!({"n_clients": i64::MAX, "n_requests_per_client": 3}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["error"]["type"], "invalid_shape");
    assert_eq!(server.request_count(), 0);
}

#[tokio::test]
async fn test_benchmark_rejects_shape_over_unit_cap() {
    let (server, port) = start_mock_ollama(MockServerConfig::default()).await;
    let state = create_test_app_state(port, 0);

    let response = build_test_app(state.clone())
        .oneshot(post_json(
            "/benchmark",
            json!({"n_clients": 11, "n_requests_per_client": 100}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["error"]["type"], "invalid_shape");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("limit is 1000"));

    let response = build_test_app(state)
        .oneshot(post_json("/benchmark", json!({"num_queries": 1001})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(server.request_count(), 0);
}

#[tokio::test]
async fn test_benchmark_missing_shape() {
    let app = build_test_app(create_test_app_state(unused_port(), 0));

    let response = app
        .oneshot(post_json("/benchmark", json!({"prompt": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["error"]["type"], "validation_error");
}

#[tokio::test]
async fn test_invalid_json_body() {
    let app = build_test_app(create_test_app_state(unused_port(), 0));

    let request = Request::builder()
        .method("POST")
        .uri("/benchmark")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["error"]["type"], "validation_error");
}

#[tokio::test]
async fn test_recipe_endpoint() {
    let (server, port) = start_mock_ollama(MockServerConfig {
        latency_ms: 0,
        ..Default::default()
    })
    .await;
    let app = build_test_app(create_test_app_state(port, 0));

    let response = app
        .oneshot(post_json(
            "/benchmark/recipe",
            json!({
                "job": {
                    "service": {
                        "model": "llama3",
                        "n_clients": 2,
                        "n_requests_per_client": 2,
                        "max_tokens": 32
                    }
                }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["total"], 4);
    assert_eq!(body["successful"], 4);
    assert_eq!(server.request_count(), 4);
}

// ==================================================================================================
// Single Query Tests
// ==================================================================================================

#[tokio::test]
async fn test_query_endpoint() {
    let (_server, port) = start_mock_ollama(MockServerConfig {
        latency_ms: 100,
        response_text: "Machine learning is a field.".to_string(),
        eval_count: Some(6),
        ..Default::default()
    })
    .await;
    let app = build_test_app(create_test_app_state(port, 0));

    let response = app
        .oneshot(post_json(
            "/query",
            json!({"prompt": "Explain what is machine learning in 2 sentences.", "model": "mistral"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["model"], "mistral");
    assert_eq!(body["response_text"], "Machine learning is a field.");
    assert_eq!(body["tokens"], 6);
    let tps = body["tps"].as_f64().unwrap();
    assert!(tps > 0.0 && tps <= 60.0, "tps = {}", tps);
}

#[tokio::test]
async fn test_query_endpoint_reports_failure_as_data() {
    let app = build_test_app(create_test_app_state(unused_port(), 0));

    let response = app
        .oneshot(post_json("/query", json!({"prompt": "hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["status"], "failure");
    assert_eq!(body["error_kind"], "unreachable");
    assert_eq!(body["tps"], 0.0);
}

#[tokio::test]
async fn test_simple_test_endpoint() {
    let (_server, port) = start_mock_ollama(MockServerConfig {
        latency_ms: 0,
        response_text: "AI is the study of intelligent agents.".to_string(),
        ..Default::default()
    })
    .await;
    let app = build_test_app(create_test_app_state(port, 0));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/simple-test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["prompt"], routes::SIMPLE_TEST_PROMPT);
    assert_eq!(body["response"], "AI is the study of intelligent agents.");
    assert_eq!(body["response_length"], 38);
    assert_eq!(body["model"], "mistral");
    assert!(body["request_time"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn test_simple_test_upstream_down() {
    let app = build_test_app(create_test_app_state(unused_port(), 0));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/simple-test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["error"]["type"], "upstream_error");
}

// ==================================================================================================
// Routing Tests
// ==================================================================================================

#[tokio::test]
async fn test_unknown_endpoint() {
    let app = build_test_app(create_test_app_state(unused_port(), 0));

    let response = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_wrong_method() {
    let app = build_test_app(create_test_app_state(unused_port(), 0));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/benchmark")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
