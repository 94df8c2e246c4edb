use anyhow::Result;
use clap::Parser;
use std::time::Duration;

use crate::bench::LoadGeneratorConfig;
use crate::http_client::InferenceEndpoint;
use crate::metrics::is_valid_job_label;
use crate::models::benchmark::DEFAULT_MAX_UNITS;

/// Ollama benchmark service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "5000")]
    pub port: u16,

    /// Hostname of the Ollama server under test
    #[arg(long, env = "OLLAMA_HOST", default_value = "localhost")]
    pub ollama_host: String,

    /// Port of the Ollama server under test
    #[arg(long, env = "OLLAMA_PORT", default_value = "11434")]
    pub ollama_port: u16,

    /// Model used when a request does not name one
    #[arg(short, long, env = "DEFAULT_MODEL", default_value = "mistral")]
    pub model: String,

    /// Per-attempt request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "60")]
    pub request_timeout: u64,

    /// Retries after the first attempt
    #[arg(long, env = "MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Worker pool size
    #[arg(long, env = "WORKER_POOL_SIZE", default_value = "64")]
    pub pool_size: usize,

    /// Upper bound on a whole benchmark run in seconds
    #[arg(long, env = "RUN_TIMEOUT", default_value = "600")]
    pub run_timeout: u64,

    /// Largest number of units a single benchmark may dispatch
    #[arg(long, env = "MAX_UNITS", default_value = "100000")]
    pub max_units: usize,

    /// Prometheus push gateway base URL (metrics export disabled when unset)
    #[arg(long, env = "PUSHGATEWAY_URL")]
    pub pushgateway_url: Option<String>,

    /// Job label used on the push gateway
    #[arg(long, env = "PUSHGATEWAY_JOB", default_value = "ollama_benchmark")]
    pub push_job: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Inference server
    pub ollama_host: String,
    pub ollama_port: u16,
    pub default_model: String,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub request_timeout: u64,
    pub max_retries: u32,

    // Load generator
    pub worker_pool_size: usize,
    pub run_timeout: u64,
    pub max_units: usize,

    // Metrics export
    pub pushgateway_url: Option<String>,
    pub pushgateway_job: String,

    pub log_level: String,
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 5000,
            ollama_host: "localhost".to_string(),
            ollama_port: 11434,
            default_model: "mistral".to_string(),
            http_max_connections: 256,
            http_connect_timeout: 10,
            request_timeout: 60,
            max_retries: 3,
            worker_pool_size: 64,
            run_timeout: 600,
            max_units: DEFAULT_MAX_UNITS,
            pushgateway_url: None,
            pushgateway_job: "ollama_benchmark".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = Self::from_args(CliArgs::parse());
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from parsed arguments plus env-only knobs
    pub fn from_args(args: CliArgs) -> Self {
        Config {
            server_host: args.host,
            server_port: args.port,

            ollama_host: args.ollama_host,
            ollama_port: args.ollama_port,
            default_model: args.model,

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 256),
            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),
            request_timeout: args.request_timeout,
            max_retries: args.max_retries,

            worker_pool_size: args.pool_size,
            run_timeout: args.run_timeout,
            max_units: args.max_units,

            pushgateway_url: args.pushgateway_url.filter(|url| !url.trim().is_empty()),
            pushgateway_job: args.push_job,

            log_level: args.log_level,
            log_json: args.log_json,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ollama_host.trim().is_empty() {
            anyhow::bail!("OLLAMA_HOST must not be empty");
        }
        if self.default_model.trim().is_empty() {
            anyhow::bail!("DEFAULT_MODEL must not be empty");
        }
        if self.request_timeout == 0 {
            anyhow::bail!("REQUEST_TIMEOUT must be at least 1 second");
        }
        if self.run_timeout == 0 {
            anyhow::bail!("RUN_TIMEOUT must be at least 1 second");
        }
        if self.worker_pool_size == 0 {
            anyhow::bail!("WORKER_POOL_SIZE must be at least 1");
        }
        if self.max_units == 0 {
            anyhow::bail!("MAX_UNITS must be at least 1");
        }
        if let Some(url) = &self.pushgateway_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("PUSHGATEWAY_URL must be an http(s) URL, got {}", url);
            }
        }
        // The job label becomes a path segment on the gateway
        if !is_valid_job_label(&self.pushgateway_job) {
            anyhow::bail!(
                "PUSHGATEWAY_JOB must be non-empty and must not contain '/', got {:?}",
                self.pushgateway_job
            );
        }

        Ok(())
    }

    /// Endpoint of the inference server under test
    pub fn endpoint(&self) -> InferenceEndpoint {
        InferenceEndpoint::new(self.ollama_host.clone(), self.ollama_port)
    }

    pub fn load_generator_config(&self) -> LoadGeneratorConfig {
        LoadGeneratorConfig {
            pool_size: self.worker_pool_size,
            run_timeout: Duration::from_secs(self.run_timeout),
            max_units: self.max_units,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
