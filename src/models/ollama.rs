use serde::{Deserialize, Serialize};

// ==================================================================================================
// Models for /api/generate endpoint
// ==================================================================================================

/// Non-streaming generation request sent to Ollama
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerateOptions>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: false,
            options: None,
        }
    }

    /// Limit the number of generated tokens (`options.num_predict`)
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.options = max_tokens.map(|n| GenerateOptions {
            num_predict: Some(n),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// Response body of a completed (non-streaming) generation.
///
/// Only `response` is required; the counters are present on real Ollama
/// servers but not on every proxy in front of one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub model: Option<String>,
    pub response: String,
    #[serde(default)]
    pub done: Option<bool>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
    #[serde(default)]
    pub total_duration: Option<u64>,
}

// ==================================================================================================
// Models for /api/version endpoint
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}
