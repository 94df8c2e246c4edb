use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::tokenizer::tokens_per_second;

/// Prompt used when a trigger does not carry one
pub const DEFAULT_PROMPT: &str = "What is AI?";

// ==================================================================================================
// Units and outcomes
// ==================================================================================================

/// One logical inference call scheduled by the load generator.
///
/// Prompt and model are shared between all units of a run.
#[derive(Debug, Clone)]
pub struct RequestUnit {
    pub prompt: Arc<str>,
    pub model: Arc<str>,
    pub max_tokens: Option<u32>,
    pub client_index: usize,
    pub request_index: usize,
}

impl RequestUnit {
    /// Label identifying the simulated client in exported metrics
    pub fn client_id(&self) -> String {
        format!("client_{}", self.client_index)
    }

    /// Label unique to this unit within a run
    pub fn instance_id(&self, run_id: &str) -> String {
        format!("{}-c{}-r{}", run_id, self.client_index, self.request_index)
    }
}

/// Failure categories of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failures or 5xx responses after all retries
    Unreachable,
    /// 4xx responses or a body that is not a generation response
    BadResponse,
    /// Still outstanding when the run deadline passed
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unreachable => write!(f, "unreachable"),
            ErrorKind::BadResponse => write!(f, "bad_response"),
            ErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Result of executing a single unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    Success {
        response_text: String,
        tokens: u64,
        /// Latency of the successful attempt, backoff excluded. Zero means unmeasured.
        elapsed_seconds: f64,
        attempts: u32,
        /// Time from the first attempt to the outcome, backoff included
        wall_seconds: f64,
    },
    Failure {
        error_kind: ErrorKind,
        message: String,
    },
}

impl RequestOutcome {
    pub fn failure(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        RequestOutcome::Failure {
            error_kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success { .. })
    }

    /// Tokens per second for successful outcomes, `None` for failures
    pub fn tokens_per_second(&self) -> Option<f64> {
        match self {
            RequestOutcome::Success {
                tokens,
                elapsed_seconds,
                ..
            } => Some(tokens_per_second(*tokens, *elapsed_seconds)),
            RequestOutcome::Failure { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            RequestOutcome::Failure { error_kind, .. } => Some(*error_kind),
            RequestOutcome::Success { .. } => None,
        }
    }
}

/// Outcome tagged with the position of its unit in the load shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub client_index: usize,
    pub request_index: usize,
    /// Start of the first attempt relative to the run start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_offset_seconds: Option<f64>,
    #[serde(flatten)]
    pub outcome: RequestOutcome,
}

// ==================================================================================================
// Load shape
// ==================================================================================================

/// Default upper bound on the units a single run may dispatch
pub const DEFAULT_MAX_UNITS: usize = 100_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("{field} must be at least 1, got {value}")]
    NonPositive { field: &'static str, value: i64 },

    #[error("load shape requests {total} units, the limit is {limit}")]
    TooLarge { total: u128, limit: usize },
}

/// Declarative description of how many units a run issues and how they are sequenced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadShape {
    /// Clients run concurrently, each client's requests run in order
    Clients {
        n_clients: usize,
        n_requests_per_client: usize,
    },
    /// Flat pool of queries, all concurrent or strictly sequential
    Flat { total_queries: usize, parallel: bool },
}

impl LoadShape {
    /// Clients shape, capped at [`DEFAULT_MAX_UNITS`]
    pub fn clients(n_clients: i64, n_requests_per_client: i64) -> Result<Self, ShapeError> {
        Self::clients_within(n_clients, n_requests_per_client, DEFAULT_MAX_UNITS)
    }

    /// Flat shape, capped at [`DEFAULT_MAX_UNITS`]
    pub fn flat(total_queries: i64, parallel: bool) -> Result<Self, ShapeError> {
        Self::flat_within(total_queries, parallel, DEFAULT_MAX_UNITS)
    }

    pub fn clients_within(
        n_clients: i64,
        n_requests_per_client: i64,
        max_units: usize,
    ) -> Result<Self, ShapeError> {
        let shape = LoadShape::Clients {
            n_clients: positive("n_clients", n_clients)?,
            n_requests_per_client: positive("n_requests_per_client", n_requests_per_client)?,
        };
        shape.validate(max_units)?;
        Ok(shape)
    }

    pub fn flat_within(
        total_queries: i64,
        parallel: bool,
        max_units: usize,
    ) -> Result<Self, ShapeError> {
        let shape = LoadShape::Flat {
            total_queries: positive("num_queries", total_queries)?,
            parallel,
        };
        shape.validate(max_units)?;
        Ok(shape)
    }

    /// Number of units the shape dispatches
    pub fn total_units(&self) -> usize {
        match *self {
            LoadShape::Clients {
                n_clients,
                n_requests_per_client,
            } => n_clients.saturating_mul(n_requests_per_client),
            LoadShape::Flat { total_queries, .. } => total_queries,
        }
    }

    /// Number of units that may be in flight at the same time
    pub fn max_in_flight(&self) -> usize {
        match *self {
            LoadShape::Clients { n_clients, .. } => n_clients,
            LoadShape::Flat {
                total_queries,
                parallel: true,
            } => total_queries,
            LoadShape::Flat { parallel: false, .. } => 1,
        }
    }

    /// Check that every count is at least 1 and the unit total fits `max_units`
    pub fn validate(&self, max_units: usize) -> Result<(), ShapeError> {
        let total = match *self {
            LoadShape::Clients {
                n_clients,
                n_requests_per_client,
            } => {
                nonzero("n_clients", n_clients)?;
                nonzero("n_requests_per_client", n_requests_per_client)?;
                n_clients.checked_mul(n_requests_per_client)
            }
            LoadShape::Flat { total_queries, .. } => {
                nonzero("num_queries", total_queries)?;
                Some(total_queries)
            }
        };

        match total {
            Some(total) if total <= max_units => Ok(()),
            _ => Err(ShapeError::TooLarge {
                total: self.requested_units(),
                limit: max_units,
            }),
        }
    }

    /// Unit total without overflow, for error reporting
    fn requested_units(&self) -> u128 {
        match *self {
            LoadShape::Clients {
                n_clients,
                n_requests_per_client,
            } => n_clients as u128 * n_requests_per_client as u128,
            LoadShape::Flat { total_queries, .. } => total_queries as u128,
        }
    }
}

fn positive(field: &'static str, value: i64) -> Result<usize, ShapeError> {
    if value < 1 {
        return Err(ShapeError::NonPositive { field, value });
    }
    usize::try_from(value).map_err(|_| ShapeError::TooLarge {
        total: value as u128,
        limit: usize::MAX,
    })
}

fn nonzero(field: &'static str, value: usize) -> Result<(), ShapeError> {
    if value == 0 {
        return Err(ShapeError::NonPositive { field, value: 0 });
    }
    Ok(())
}

// ==================================================================================================
// Benchmark trigger
// ==================================================================================================

/// Load shape as it appears on the wire.
///
/// Counts are signed so that negative values reach validation instead of
/// failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShapeSpec {
    Clients {
        n_clients: i64,
        n_requests_per_client: i64,
    },
    Flat {
        num_queries: i64,
        #[serde(default = "default_parallel")]
        parallel: bool,
    },
}

fn default_parallel() -> bool {
    true
}

/// Body of `POST /benchmark`.
///
/// The query parameters of the old per-job client script
/// (`{service, n_clients, n_requests_per_client, prompt}`) deserialize
/// directly into this type; the extra `service` key is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRequest {
    #[serde(flatten)]
    pub shape: ShapeSpec,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl BenchmarkRequest {
    /// Validated load shape dispatching at most `max_units` units
    pub fn load_shape(&self, max_units: usize) -> Result<LoadShape, ShapeError> {
        match self.shape {
            ShapeSpec::Clients {
                n_clients,
                n_requests_per_client,
            } => LoadShape::clients_within(n_clients, n_requests_per_client, max_units),
            ShapeSpec::Flat {
                num_queries,
                parallel,
            } => LoadShape::flat_within(num_queries, parallel, max_units),
        }
    }

    pub fn prompt_or_default(&self) -> &str {
        self.prompt.as_deref().unwrap_or(DEFAULT_PROMPT)
    }
}

/// Job recipe submitted by the deployment front-end
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub job: RecipeJob,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeJob {
    #[serde(default)]
    pub service: RecipeService,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeService {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "one")]
    pub n_clients: i64,
    #[serde(default = "one")]
    pub n_requests_per_client: i64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl Default for RecipeService {
    fn default() -> Self {
        Self {
            model: None,
            n_clients: 1,
            n_requests_per_client: 1,
            max_tokens: None,
            prompt: None,
        }
    }
}

fn one() -> i64 {
    1
}

impl From<Recipe> for BenchmarkRequest {
    fn from(recipe: Recipe) -> Self {
        let service = recipe.job.service;
        BenchmarkRequest {
            shape: ShapeSpec::Clients {
                n_clients: service.n_clients,
                n_requests_per_client: service.n_requests_per_client,
            },
            prompt: service.prompt,
            model: service.model,
            max_tokens: service.max_tokens,
        }
    }
}

/// Body of `POST /query`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}
