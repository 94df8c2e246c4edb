//! Load generator: fans units out over a bounded worker pool.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::config::LoadGeneratorConfig;
use super::report::BenchmarkReport;
use crate::http_client::OllamaHttpClient;
use crate::metrics::MetricsPusher;
use crate::models::benchmark::{
    ErrorKind, LoadShape, RequestOutcome, RequestUnit, ShapeError, UnitResult,
};

/// Raw output of one run, results sorted by `(client_index, request_index)`
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: String,
    pub results: Vec<UnitResult>,
    pub wall_clock: Duration,
}

/// Report plus the per-unit results it was computed from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub run_id: String,
    #[serde(flatten)]
    pub report: BenchmarkReport,
    pub results: Vec<UnitResult>,
}

/// What a worker hands back for each unit
struct Completed {
    unit: RequestUnit,
    started_offset: f64,
    outcome: RequestOutcome,
}

/// Lane progress reported to the collector
enum LaneEvent {
    Started { key: (usize, usize), offset: f64 },
    Finished(Completed),
}

/// Load generator that executes units against the inference endpoint
pub struct LoadGenerator {
    client: Arc<OllamaHttpClient>,
    pusher: Option<MetricsPusher>,
    config: LoadGeneratorConfig,
}

impl LoadGenerator {
    /// Create a new load generator
    pub fn new(client: Arc<OllamaHttpClient>, config: LoadGeneratorConfig) -> Self {
        Self {
            client,
            pusher: None,
            config,
        }
    }

    /// Export the throughput of every successful unit through `pusher`
    pub fn with_pusher(mut self, pusher: MetricsPusher) -> Self {
        self.pusher = Some(pusher);
        self
    }

    pub fn client(&self) -> &OllamaHttpClient {
        &self.client
    }

    /// Run a load shape and summarize it
    pub async fn benchmark(
        &self,
        shape: LoadShape,
        prompt: &str,
        model: &str,
        max_tokens: Option<u32>,
    ) -> Result<BenchmarkRun, ShapeError> {
        let output = self.run(shape, prompt, model, max_tokens).await?;
        let report = BenchmarkReport::summarize(&output.results, output.wall_clock);

        tracing::info!(
            run_id = %output.run_id,
            successful = report.successful,
            failed = report.failed,
            qps = report.queries_per_second,
            avg_tps = report.avg_tps,
            "Benchmark run finished"
        );

        Ok(BenchmarkRun {
            run_id: output.run_id,
            report,
            results: output.results,
        })
    }

    /// Execute every unit of `shape` and return exactly one result per unit.
    ///
    /// Each lane (a simulated client, or a single flat query) holds one pool
    /// permit for its whole sequence. Units still outstanding when the run
    /// timeout expires are reported as `timeout` failures. Units that were in
    /// flight keep their start offset, units that never started have none.
    pub async fn run(
        &self,
        shape: LoadShape,
        prompt: &str,
        model: &str,
        max_tokens: Option<u32>,
    ) -> Result<RunOutput, ShapeError> {
        shape.validate(self.config.max_units)?;

        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let lanes = build_lanes(shape, Arc::from(prompt), Arc::from(model), max_tokens);
        let expected: Vec<(usize, usize)> = lanes
            .iter()
            .flatten()
            .map(|u| (u.client_index, u.request_index))
            .collect();
        let total = expected.len();
        let pool_size = self.pool_size_for(shape);

        tracing::info!(
            run_id = %run_id,
            shape = ?shape,
            total_units = total,
            pool_size,
            max_retries = self.client.max_retries(),
            "Starting benchmark run"
        );

        let semaphore = Arc::new(Semaphore::new(pool_size));
        // Two events per unit, so lanes never block on a full channel
        let (tx, mut rx) = mpsc::channel::<LaneEvent>(total.saturating_mul(2).max(1));
        let run_start = Instant::now();
        let deadline = run_start + self.config.run_timeout;

        let mut workers = JoinSet::new();
        for lane in lanes {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();

            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                // Strictly sequential within a lane: the next unit starts
                // only after the previous outcome has been handed over.
                for unit in lane {
                    let started_offset = run_start.elapsed().as_secs_f64();
                    let key = (unit.client_index, unit.request_index);
                    let started = LaneEvent::Started {
                        key,
                        offset: started_offset,
                    };
                    if tx.send(started).await.is_err() {
                        break;
                    }

                    let outcome = client.execute(&unit).await;
                    let completed = Completed {
                        unit,
                        started_offset,
                        outcome,
                    };
                    if tx.send(LaneEvent::Finished(completed)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut received: HashMap<(usize, usize), UnitResult> = HashMap::with_capacity(total);
        let mut started: HashMap<(usize, usize), f64> = HashMap::new();
        let mut pushes = JoinSet::new();
        let mut timed_out = false;

        let timeout = tokio::time::sleep_until(deadline);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(LaneEvent::Started { key, offset }) => {
                        started.insert(key, offset);
                    }
                    Some(LaneEvent::Finished(completed)) => {
                        self.record(&run_id, &completed, &mut pushes);
                        let key = (completed.unit.client_index, completed.unit.request_index);
                        started.remove(&key);
                        received.insert(key, UnitResult {
                            client_index: key.0,
                            request_index: key.1,
                            started_offset_seconds: Some(completed.started_offset),
                            outcome: completed.outcome,
                        });
                    }
                    None => break,
                },
                _ = &mut timeout => {
                    timed_out = true;
                    tracing::warn!(
                        run_id = %run_id,
                        outstanding = total - received.len(),
                        timeout_secs = self.config.run_timeout.as_secs_f64(),
                        "Run timeout reached, cancelling outstanding units"
                    );
                    break;
                }
            }
        }

        let wall_clock = run_start.elapsed();

        workers.abort_all();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(run_id = %run_id, "Benchmark worker panicked: {}", e);
                }
            }
        }

        while pushes.join_next().await.is_some() {}

        let timeout_secs = self.config.run_timeout.as_secs_f64();
        let results = expected
            .into_iter()
            .map(|key| {
                received.remove(&key).unwrap_or_else(|| {
                    let offset = started.get(&key).copied();
                    let message = match (timed_out, offset) {
                        (true, Some(_)) => format!(
                            "Unit still in flight after the run timeout of {:.1}s",
                            timeout_secs
                        ),
                        (true, None) => format!(
                            "Unit not started before the run timeout of {:.1}s",
                            timeout_secs
                        ),
                        (false, _) => "Worker stopped before the unit completed".to_string(),
                    };
                    UnitResult {
                        client_index: key.0,
                        request_index: key.1,
                        started_offset_seconds: offset,
                        outcome: RequestOutcome::failure(ErrorKind::Timeout, message),
                    }
                })
            })
            .collect();

        Ok(RunOutput {
            run_id,
            results,
            wall_clock,
        })
    }

    /// Log a completed unit and hand successful ones to the pusher
    fn record(&self, run_id: &str, completed: &Completed, pushes: &mut JoinSet<()>) {
        let unit = &completed.unit;
        match &completed.outcome {
            RequestOutcome::Success {
                tokens,
                elapsed_seconds,
                ..
            } => {
                let tps = completed.outcome.tokens_per_second().unwrap_or(0.0);
                tracing::info!(
                    run_id = run_id,
                    client_index = unit.client_index,
                    request_index = unit.request_index,
                    tokens = *tokens,
                    elapsed_seconds = *elapsed_seconds,
                    "TPS={:.2}",
                    tps
                );

                if let Some(pusher) = &self.pusher {
                    let pusher = pusher.clone();
                    let model = unit.model.clone();
                    let client_id = unit.client_id();
                    let instance_id = unit.instance_id(run_id);
                    pushes.spawn(async move {
                        pusher.push(tps, &model, &client_id, &instance_id).await;
                    });
                }
            }
            RequestOutcome::Failure {
                error_kind,
                message,
            } => {
                tracing::warn!(
                    run_id = run_id,
                    client_index = unit.client_index,
                    request_index = unit.request_index,
                    error_kind = %error_kind,
                    "Unit failed: {}",
                    message
                );
            }
        }
    }

    /// Worker pool size for a shape
    fn pool_size_for(&self, shape: LoadShape) -> usize {
        let configured = self.config.pool_size.max(1);
        match shape {
            // Never fewer workers than simulated clients
            LoadShape::Clients { .. } => configured.max(shape.max_in_flight()),
            LoadShape::Flat { .. } => configured.min(shape.max_in_flight()),
        }
    }
}

/// Split a shape into lanes of units that must run in order
fn build_lanes(
    shape: LoadShape,
    prompt: Arc<str>,
    model: Arc<str>,
    max_tokens: Option<u32>,
) -> Vec<Vec<RequestUnit>> {
    let unit = |client_index: usize, request_index: usize| RequestUnit {
        prompt: prompt.clone(),
        model: model.clone(),
        max_tokens,
        client_index,
        request_index,
    };

    match shape {
        LoadShape::Clients {
            n_clients,
            n_requests_per_client,
        } => (0..n_clients)
            .map(|c| (0..n_requests_per_client).map(|r| unit(c, r)).collect())
            .collect(),
        LoadShape::Flat {
            total_queries,
            parallel: true,
        } => (0..total_queries).map(|i| vec![unit(i, 0)]).collect(),
        LoadShape::Flat {
            total_queries,
            parallel: false,
        } => vec![(0..total_queries).map(|i| unit(i, 0)).collect()],
    }
}
