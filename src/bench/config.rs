//! Configuration structs for benchmarking.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::benchmark::DEFAULT_MAX_UNITS;

/// Configuration for the mock Ollama server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockServerConfig {
    /// Port to listen on (0 for random)
    pub port: u16,
    /// Simulated generation latency in milliseconds
    pub latency_ms: u64,
    /// Text returned in the `response` field
    pub response_text: String,
    /// `eval_count` to report, omitted when `None`
    pub eval_count: Option<u64>,
    /// `prompt_eval_count` to report, omitted when `None`
    pub prompt_eval_count: Option<u64>,
    /// Error rate (0.0 to 1.0)
    pub error_rate: f64,
    /// Number of initial requests answered with `error_status`
    pub fail_first: usize,
    /// Status used for injected failures
    pub error_status: u16,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            latency_ms: 10,
            response_text: "ok ok ok".to_string(),
            eval_count: Some(3),
            prompt_eval_count: None,
            error_rate: 0.0,
            fail_first: 0,
            error_status: 500,
        }
    }
}

/// Tuning knobs of the load generator
#[derive(Debug, Clone)]
pub struct LoadGeneratorConfig {
    /// Worker pool size. Raised to the number of clients for client shapes.
    pub pool_size: usize,
    /// Upper bound on the whole run
    pub run_timeout: Duration,
    /// Shapes dispatching more units than this are rejected
    pub max_units: usize,
}

impl Default for LoadGeneratorConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            run_timeout: Duration::from_secs(600),
            max_units: DEFAULT_MAX_UNITS,
        }
    }
}
