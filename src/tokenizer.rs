// Token counting module
// Derives token counts and throughput from completed generation responses
//
// The server's own counters are preferred because they come from the model's
// tokenizer. Word counting is only an estimate for endpoints that omit them.

use crate::models::ollama::GenerateResponse;

/// Source a token count was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// `eval_count` reported by the server
    Evaluated,
    /// `prompt_eval_count` reported by the server
    PromptEvaluated,
    /// Whitespace-delimited words of the response text
    WordEstimate,
}

/// Counts the tokens of a completed response and reports which field was used.
///
/// Preference order: `eval_count`, then `prompt_eval_count`, then a word
/// count of the response text.
pub fn count_tokens_with_source(response: &GenerateResponse) -> (u64, TokenSource) {
    if let Some(n) = response.eval_count {
        return (n, TokenSource::Evaluated);
    }
    if let Some(n) = response.prompt_eval_count {
        return (n, TokenSource::PromptEvaluated);
    }
    (count_words(&response.response), TokenSource::WordEstimate)
}

/// Number of whitespace-delimited words in `text`
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Tokens per second of measured latency.
///
/// Returns 0 when `elapsed_seconds` is not positive (unmeasured) or not finite.
pub fn tokens_per_second(tokens: u64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds > 0.0 && elapsed_seconds.is_finite() {
        tokens as f64 / elapsed_seconds
    } else {
        0.0
    }
}
