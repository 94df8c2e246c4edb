use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::bench::{BenchmarkRun, LoadGenerator};
use crate::config::Config;
use crate::error::ApiError;
use crate::models::benchmark::{
    BenchmarkRequest, QueryRequest, Recipe, RequestOutcome, RequestUnit, DEFAULT_PROMPT,
};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prompt used by `GET /simple-test`
pub const SIMPLE_TEST_PROMPT: &str =
    "What is artificial intelligence? Please explain in one paragraph.";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub generator: Arc<LoadGenerator>,
}

/// Response of `POST /query`
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub model: String,
    pub prompt: String,
    #[serde(flatten)]
    pub outcome: RequestOutcome,
    pub tps: f64,
}

/// Health check routes
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Benchmark trigger and single-query routes
pub fn benchmark_routes(state: AppState) -> Router {
    Router::new()
        .route("/benchmark", post(benchmark_handler))
        .route("/benchmark/recipe", post(recipe_handler))
        .route("/query", post(query_handler))
        .route("/simple-test", get(simple_test_handler))
        .with_state(state)
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Ollama benchmark service is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
///
/// Reports the configured inference endpoint without contacting it.
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "ollama_host": state.generator.client().endpoint().to_string(),
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// POST /benchmark - Run a load shape and return the report plus per-unit results
///
/// Accepts either `{n_clients, n_requests_per_client, ...}` or
/// `{num_queries, parallel, ...}`. Invalid counts are rejected with 400
/// before any request is sent.
async fn benchmark_handler(
    State(state): State<AppState>,
    payload: Result<Json<BenchmarkRequest>, JsonRejection>,
) -> Result<Json<BenchmarkRun>, ApiError> {
    let Json(request) = payload.map_err(invalid_body)?;
    run_benchmark(&state, request).await.map(Json)
}

/// POST /benchmark/recipe - Job recipe adapter
async fn recipe_handler(
    State(state): State<AppState>,
    payload: Result<Json<Recipe>, JsonRejection>,
) -> Result<Json<BenchmarkRun>, ApiError> {
    let Json(recipe) = payload.map_err(invalid_body)?;
    run_benchmark(&state, BenchmarkRequest::from(recipe))
        .await
        .map(Json)
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    ApiError::ValidationError(rejection.body_text())
}

async fn run_benchmark(
    state: &AppState,
    request: BenchmarkRequest,
) -> Result<BenchmarkRun, ApiError> {
    let shape = request.load_shape(state.config.max_units)?;
    let model = request
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(&state.config.default_model);

    tracing::info!(
        model = model,
        total_units = shape.total_units(),
        "Benchmark requested"
    );

    let run = state
        .generator
        .benchmark(shape, request.prompt_or_default(), model, request.max_tokens)
        .await?;

    Ok(run)
}

/// POST /query - Run a single unit
async fn query_handler(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(invalid_body)?;
    let prompt = request
        .prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    let model = request
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    let outcome = execute_single(&state, &prompt, &model, request.max_tokens).await;
    let tps = outcome.tokens_per_second().unwrap_or(0.0);

    Ok(Json(QueryResponse {
        model,
        prompt,
        outcome,
        tps,
    }))
}

/// GET /simple-test - Ask a fixed question, 502 if the server does not answer
async fn simple_test_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let model = state.config.default_model.clone();
    let outcome = execute_single(&state, SIMPLE_TEST_PROMPT, &model, None).await;

    match outcome {
        RequestOutcome::Success {
            response_text,
            elapsed_seconds,
            ..
        } => Ok(Json(json!({
            "prompt": SIMPLE_TEST_PROMPT,
            "response_length": response_text.chars().count(),
            "response": response_text,
            "request_time": elapsed_seconds,
            "model": model
        }))),
        RequestOutcome::Failure {
            error_kind,
            message,
        } => Err(ApiError::Upstream(format!(
            "Simple test failed ({}): {}",
            error_kind, message
        ))),
    }
}

async fn execute_single(
    state: &AppState,
    prompt: &str,
    model: &str,
    max_tokens: Option<u32>,
) -> RequestOutcome {
    let unit = RequestUnit {
        prompt: Arc::from(prompt),
        model: Arc::from(model),
        max_tokens,
        client_index: 0,
        request_index: 0,
    };
    state.generator.client().execute(&unit).await
}
