//! Benchmark aggregation and report generation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use super::metrics::{LatencyPercentiles, TpsStats};
use crate::models::benchmark::{ErrorKind, RequestOutcome, UnitResult};
use crate::tokenizer::tokens_per_second;

/// Aggregate over all outcomes of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of successful units
    pub success_rate: f64,
    /// Wall-clock duration of the whole run in seconds
    pub total_duration: f64,
    /// Mean latency of measured successful units in seconds
    pub avg_request_time: f64,
    /// Mean of per-unit tokens per second
    pub avg_tps: f64,
    /// Tokens of all successful units divided by the run duration
    pub aggregate_tps: f64,
    pub total_tokens: u64,
    pub queries_per_second: f64,
    pub latency: LatencyPercentiles,
    pub tps: TpsStats,
    pub failures_by_kind: BTreeMap<ErrorKind, usize>,
}

impl BenchmarkReport {
    /// Summarize the outcomes of a run.
    ///
    /// Means are taken over successful units with a positive elapsed time;
    /// a zero elapsed time means unmeasured. Every rate is 0 when its
    /// denominator is 0.
    pub fn summarize(results: &[UnitResult], total_wall_clock: Duration) -> Self {
        let wall = total_wall_clock.as_secs_f64();

        let mut successful = 0usize;
        let mut total_tokens = 0u64;
        let mut latencies = Vec::new();
        let mut tps_samples = Vec::new();
        let mut failures_by_kind = BTreeMap::new();

        for result in results {
            match &result.outcome {
                RequestOutcome::Success {
                    tokens,
                    elapsed_seconds,
                    ..
                } => {
                    successful += 1;
                    total_tokens += tokens;
                    if *elapsed_seconds > 0.0 && elapsed_seconds.is_finite() {
                        latencies.push(*elapsed_seconds);
                        tps_samples.push(tokens_per_second(*tokens, *elapsed_seconds));
                    }
                }
                RequestOutcome::Failure { error_kind, .. } => {
                    *failures_by_kind.entry(*error_kind).or_insert(0) += 1;
                }
            }
        }

        let total = results.len();
        let failed = total - successful;

        let avg_request_time = mean(&latencies);
        let tps = TpsStats::from_samples(&tps_samples);

        let (queries_per_second, aggregate_tps) = if wall > 0.0 {
            (total as f64 / wall, total_tokens as f64 / wall)
        } else {
            (0.0, 0.0)
        };

        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };

        Self {
            total,
            successful,
            failed,
            success_rate,
            total_duration: wall,
            avg_request_time,
            avg_tps: tps.mean,
            aggregate_tps,
            total_tokens,
            queries_per_second,
            latency: LatencyPercentiles::from_seconds(&latencies),
            tps,
            failures_by_kind,
        }
    }

    /// Print the report as an ASCII table
    pub fn print_table(&self) {
        println!();
        println!("╔══════════════════════════════════════════════════════════════════════════╗");
        println!("║                       OLLAMA BENCHMARK RESULTS                           ║");
        println!("╚══════════════════════════════════════════════════════════════════════════╝");
        println!();
        println!("┌─────────┬─────────┬─────────┬──────────┬──────────┬──────────┬──────────┐");
        println!("│  Total  │   OK    │ Failed  │   QPS    │ Avg(s)   │ p99(s)   │ Avg TPS  │");
        println!("├─────────┼─────────┼─────────┼──────────┼──────────┼──────────┼──────────┤");
        println!(
            "│ {:>7} │ {:>7} │ {:>7} │ {:>8.2} │ {:>8.3} │ {:>8.3} │ {:>8.2} │",
            self.total,
            self.successful,
            self.failed,
            self.queries_per_second,
            self.avg_request_time,
            self.latency.p99,
            self.avg_tps
        );
        println!("└─────────┴─────────┴─────────┴──────────┴──────────┴──────────┴──────────┘");
        println!();
        println!(
            "Duration: {:.2}s, tokens: {}, aggregate TPS: {:.2}",
            self.total_duration, self.total_tokens, self.aggregate_tps
        );
        println!(
            "TPS min/median/max: {:.2}/{:.2}/{:.2} (std dev {:.2})",
            self.tps.min, self.tps.median, self.tps.max, self.tps.std_dev
        );
        for (kind, count) in &self.failures_by_kind {
            println!("Failures ({}): {}", kind, count);
        }
        println!();
    }

    /// Export the report as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// One `tps` column with a row per measured successful unit
    pub fn tps_csv(results: &[UnitResult]) -> String {
        let mut csv = String::from("tps\n");
        for tps in results.iter().filter_map(measured_tps) {
            let _ = writeln!(csv, "{}", tps);
        }
        csv
    }
}

fn measured_tps(result: &UnitResult) -> Option<f64> {
    match &result.outcome {
        RequestOutcome::Success {
            tokens,
            elapsed_seconds,
            ..
        } if *elapsed_seconds > 0.0 => Some(tokens_per_second(*tokens, *elapsed_seconds)),
        _ => None,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
