// CORS and request logging middleware

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create CORS middleware layer
///
/// Configures CORS to allow all origins, methods, and headers.
/// Handles OPTIONS preflight requests automatically.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// HTTP tracing layer emitting spans at debug level
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// Request logging middleware
///
/// Tags every request with a short id and logs method, path, status and
/// duration once the response is ready. Benchmark runs can take minutes, so
/// the start is logged too.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    tracing::debug!("[{}] --> {} {}", request_id, method, path);

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();

    if status.is_server_error() {
        tracing::warn!(
            "[{}] <-- {} {} {} ({} ms)",
            request_id,
            method,
            path,
            status.as_u16(),
            elapsed_ms
        );
    } else {
        tracing::info!(
            "[{}] <-- {} {} {} ({} ms)",
            request_id,
            method,
            path,
            status.as_u16(),
            elapsed_ms
        );
    }

    response
}
