use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::models::benchmark::{ErrorKind, RequestOutcome, RequestUnit};
use crate::models::ollama::{GenerateRequest, GenerateResponse, VersionResponse};
use crate::tokenizer::count_tokens_with_source;

/// Resolved address of the inference server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceEndpoint {
    pub host: String,
    pub port: u16,
}

impl InferenceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }
}

impl fmt::Display for InferenceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for InferenceEndpoint {
    type Err = String;

    /// Parses `host:port`, optionally prefixed with `http://`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s
            .trim()
            .trim_start_matches("http://")
            .trim_end_matches('/');
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| format!("Expected host:port, got: {}", s))?;
        if host.is_empty() {
            return Err(format!("Missing host in: {}", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("Invalid port in: {}", s))?;
        Ok(Self::new(host, port))
    }
}

/// Why a single attempt did not produce a generation response
#[derive(Debug)]
enum AttemptError {
    /// Connection failures, timeouts, 429 and 5xx: worth retrying
    Transient(String),
    /// 4xx and unparseable bodies: retrying would not help
    Protocol(String),
}

/// HTTP client for the Ollama generate API with retry logic
pub struct OllamaHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Inference server address
    endpoint: InferenceEndpoint,

    /// Maximum number of retries after the first attempt
    max_retries: u32,

    /// Base delay for exponential backoff
    base_delay: Duration,
}

impl OllamaHttpClient {
    /// Create a new HTTP client
    pub fn new(
        endpoint: InferenceEndpoint,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            max_retries,
            base_delay: Duration::from_secs(1),
        })
    }

    /// Override the backoff base delay (1 second by default)
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn endpoint(&self) -> &InferenceEndpoint {
        &self.endpoint
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Execute one unit against the generate endpoint.
    ///
    /// Transient failures are retried up to `max_retries` times, sleeping
    /// `base_delay * 2^attempt` in between. Never returns an error: every
    /// failure is folded into the outcome.
    pub async fn execute(&self, unit: &RequestUnit) -> RequestOutcome {
        let url = self.endpoint.generate_url();
        let body =
            GenerateRequest::new(&*unit.model, &*unit.prompt).with_max_tokens(unit.max_tokens);
        let first_start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            tracing::debug!(
                client_index = unit.client_index,
                request_index = unit.request_index,
                attempt = attempt + 1,
                max_attempts = self.max_retries.saturating_add(1),
                "Executing generate attempt"
            );

            let call_start = Instant::now();
            let result = self.attempt(&url, &body).await;
            let elapsed = call_start.elapsed();

            match result {
                Ok(response) => {
                    let (tokens, source) = count_tokens_with_source(&response);
                    tracing::debug!(
                        client_index = unit.client_index,
                        request_index = unit.request_index,
                        tokens,
                        token_source = ?source,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Generate request successful"
                    );
                    return RequestOutcome::Success {
                        response_text: response.response,
                        tokens,
                        elapsed_seconds: elapsed.as_secs_f64(),
                        attempts: attempt + 1,
                        wall_seconds: first_start.elapsed().as_secs_f64(),
                    };
                }

                Err(AttemptError::Protocol(message)) => {
                    tracing::warn!(
                        client_index = unit.client_index,
                        request_index = unit.request_index,
                        error = %message,
                        "Generate request rejected, not retrying"
                    );
                    return RequestOutcome::failure(ErrorKind::BadResponse, message);
                }

                Err(AttemptError::Transient(message)) => {
                    if attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            client_index = unit.client_index,
                            request_index = unit.request_index,
                            attempt = attempt + 1,
                            max_attempts = self.max_retries.saturating_add(1),
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Generate request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        client_index = unit.client_index,
                        request_index = unit.request_index,
                        url = %url,
                        total_attempts = attempt + 1,
                        error = %message,
                        "Generate request failed after all retries"
                    );
                    return RequestOutcome::failure(
                        ErrorKind::Unreachable,
                        format!("{} (after {} attempts)", message, attempt + 1),
                    );
                }
            }
        }
    }

    /// One network round trip, body included
    async fn attempt(
        &self,
        url: &str,
        body: &GenerateRequest,
    ) -> std::result::Result<GenerateResponse, AttemptError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(describe_reqwest_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status.as_u16(), preview(&text));
            return Err(if is_retryable_status(status) {
                AttemptError::Transient(message)
            } else {
                AttemptError::Protocol(message)
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AttemptError::Transient(describe_reqwest_error(&e)))?;

        serde_json::from_slice::<GenerateResponse>(&bytes).map_err(|e| {
            AttemptError::Protocol(format!(
                "Failed to parse response: {} - Body: {}",
                e,
                preview(&String::from_utf8_lossy(&bytes))
            ))
        })
    }

    /// Check that the inference server answers at all
    pub async fn ping(&self) -> Result<String> {
        let url = format!("{}/api/version", self.endpoint.base_url());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("{} answered with status {}", url, response.status());
        }

        let version: VersionResponse = response
            .json()
            .await
            .context("Failed to parse version response")?;
        Ok(version.version)
    }

    /// Calculate exponential backoff delay: base_delay * 2^attempt
    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Categorize a transport error for logs and failure messages
fn describe_reqwest_error(e: &reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    };
    format!("Request failed: {} (kind: {})", e, kind)
}

fn preview(text: &str) -> String {
    text.chars().take(500).collect()
}
