//! Distribution statistics over per-unit latencies and throughput.
//!
//! Latency percentiles go through HdrHistogram at microsecond resolution.
//! Everything here is a pure function of its input slice.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Highest latency tracked by the histogram (10 minutes, in microseconds)
const MAX_TRACKED_MICROS: u64 = 600_000_000;

/// Latency percentiles in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyPercentiles {
    /// Percentiles of `latencies` (seconds). All zero for an empty slice.
    pub fn from_seconds(latencies: &[f64]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }

        let mut hist = match Histogram::<u64>::new_with_bounds(1, MAX_TRACKED_MICROS, 3) {
            Ok(hist) => hist,
            Err(e) => {
                tracing::warn!("Failed to create latency histogram: {}", e);
                return Self::default();
            }
        };

        for &secs in latencies {
            let micros = (secs * 1_000_000.0).round().max(1.0) as u64;
            hist.saturating_record(micros);
        }

        Self {
            p50: hist.value_at_quantile(0.50) as f64 / 1_000_000.0,
            p95: hist.value_at_quantile(0.95) as f64 / 1_000_000.0,
            p99: hist.value_at_quantile(0.99) as f64 / 1_000_000.0,
        }
    }
}

/// Descriptive statistics of a set of tokens-per-second samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TpsStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    /// Sample standard deviation (n - 1), 0 for fewer than two samples
    pub std_dev: f64,
}

impl TpsStats {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let n = samples.len();
        let mean = samples.iter().sum::<f64>() / n as f64;

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };

        let std_dev = if n > 1 {
            let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        Self {
            count: n,
            mean,
            min: sorted[0],
            max: sorted[n - 1],
            median,
            std_dev,
        }
    }
}
