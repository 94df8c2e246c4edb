use anyhow::Result;
use std::sync::Arc;

use ollama_bench::{
    bench::LoadGenerator,
    config::Config,
    http_client::OllamaHttpClient,
    metrics::MetricsPusher,
    middleware,
    routes::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;

    init_tracing(&config);

    tracing::info!("🚀 Ollama Bench starting...");
    tracing::info!(
        "Server configured: {}:{}",
        config.server_host,
        config.server_port
    );

    // Initialize HTTP client
    let http_client = Arc::new(OllamaHttpClient::new(
        config.endpoint(),
        config.http_max_connections,
        config.http_connect_timeout,
        config.request_timeout,
        config.max_retries,
    )?);
    tracing::info!("✅ HTTP client initialized with connection pooling");

    // Check the inference server once; benchmarks still run if it is down
    match http_client.ping().await {
        Ok(version) => {
            tracing::info!(
                "✅ Ollama reachable at {} (version {})",
                config.endpoint(),
                version
            );
        }
        Err(e) => {
            tracing::warn!("❌ Ollama not reachable at {}: {}", config.endpoint(), e);
            tracing::warn!("Server will start but benchmark units will fail until it is up");
        }
    }

    let mut generator = LoadGenerator::new(http_client, config.load_generator_config());
    if let Some(url) = &config.pushgateway_url {
        let pusher = MetricsPusher::new(url.clone(), config.pushgateway_job.clone())?;
        tracing::info!(
            "✅ Pushing throughput samples to {} (job {})",
            pusher.gateway_url(),
            config.pushgateway_job
        );
        generator = generator.with_pusher(pusher);
    }

    let app_state = AppState {
        config: Arc::new(config.clone()),
        generator: Arc::new(generator),
    };

    let app = build_app(app_state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    print_startup_banner(&config);

    tracing::info!("🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

/// Initialize logging with the configured level, `RUST_LOG` wins when set
fn init_tracing(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false);

    if config.log_json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

/// Build the application with all routes and middleware
fn build_app(state: AppState) -> axum::Router {
    use axum::Router;

    Router::new()
        .merge(routes::health_routes(state.clone()))
        .merge(routes::benchmark_routes(state))
        // Applied bottom-up: CORS -> trace -> request logging
        .layer(axum::middleware::from_fn(middleware::request_logging))
        .layer(middleware::trace_layer())
        .layer(middleware::cors_layer())
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    let banner = r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║                  🚀 Ollama Bench                          ║
║                                                           ║
║  Parallel load generator for Ollama inference servers     ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
"#;

    println!("{}", banner);
    println!("  Version:     {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Server:      http://{}:{}",
        config.server_host, config.server_port
    );
    println!("  Ollama:      {}", config.endpoint().base_url());
    println!("  Model:       {}", config.default_model);
    println!(
        "  Retries:     {} (timeout {}s per attempt)",
        config.max_retries, config.request_timeout
    );
    println!(
        "  Pool:        {} workers, run timeout {}s",
        config.worker_pool_size, config.run_timeout
    );
    println!("  Max units:   {} per run", config.max_units);
    println!(
        "  Pushgateway: {}",
        config.pushgateway_url.as_deref().unwrap_or("disabled")
    );
    println!("  Log Level:   {}", config.log_level);
    println!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
