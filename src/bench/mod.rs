//! Benchmark engine for Ollama-compatible inference servers.
//!
//! - Load generator with a bounded worker pool and a run deadline
//! - Mock Ollama server for tests and standalone runs
//! - HdrHistogram-based latency percentiles
//! - Report aggregation and export

pub mod config;
pub mod metrics;
pub mod mock_server;
pub mod report;
pub mod runner;

pub use config::{LoadGeneratorConfig, MockServerConfig};
pub use metrics::{LatencyPercentiles, TpsStats};
pub use mock_server::MockOllamaServer;
pub use report::BenchmarkReport;
pub use runner::{BenchmarkRun, LoadGenerator, RunOutput};
