use anyhow::{Context, Result};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use reqwest::Client;
use std::time::Duration;

/// Name of the exported gauge
pub const TPS_METRIC: &str = "tokens_per_second";

/// Timeout for a single push
const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort pusher of per-request throughput samples to a Prometheus push gateway.
///
/// Each sample is PUT under its own instance label, so concurrent pushes
/// from the same job never replace each other.
#[derive(Clone)]
pub struct MetricsPusher {
    client: Client,
    gateway_url: String,
    job: String,
}

impl MetricsPusher {
    pub fn new(gateway_url: impl Into<String>, job: impl Into<String>) -> Result<Self> {
        let job = job.into();
        if !is_valid_job_label(&job) {
            anyhow::bail!("Invalid push gateway job label {:?}", job);
        }

        let client = Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .context("Failed to create push gateway client")?;

        Ok(Self {
            client,
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            job,
        })
    }

    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    /// Push one sample. Failures are logged and swallowed.
    pub async fn push(&self, tps: f64, model: &str, client_id: &str, instance_id: &str) {
        if let Err(e) = self.try_push(tps, model, client_id, instance_id).await {
            tracing::warn!(
                client_id = client_id,
                instance_id = instance_id,
                error = %e,
                "Failed to push metrics to gateway"
            );
        }
    }

    /// Push one sample, reporting failures to the caller
    pub async fn try_push(
        &self,
        tps: f64,
        model: &str,
        client_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        let body = render_sample(tps, model, client_id)?;
        let url = format!(
            "{}/metrics/job/{}/instance/{}",
            self.gateway_url, self.job, instance_id
        );

        let response = self
            .client
            .put(&url)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach push gateway at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Push gateway answered {}: {}", status.as_u16(), text);
        }

        tracing::debug!(instance_id = instance_id, tps, "Pushed throughput sample");
        Ok(())
    }
}

/// A job label must fit in one path segment of the gateway URL
pub fn is_valid_job_label(job: &str) -> bool {
    !job.is_empty() && !job.contains('/')
}

/// Render a single gauge sample in the Prometheus text exposition format
pub fn render_sample(tps: f64, model: &str, client_id: &str) -> Result<String> {
    let registry = Registry::new();
    let gauge = GaugeVec::new(
        Opts::new(TPS_METRIC, "Tokens generated per second of request latency"),
        &["client_id", "model"],
    )?;
    registry.register(Box::new(gauge.clone()))?;
    gauge.with_label_values(&[client_id, model]).set(tps);

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
