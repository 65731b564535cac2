//! Token counting
//!
//! Estimates token counts for arbitrary text against a model's tokenizer.
//! Used by the tracer as a fallback when a provider does not report usage,
//! and available standalone for prompt budgeting.
//!
//! Counting uses tiktoken encodings where the model is recognized and falls
//! back to a ~4-characters-per-token heuristic otherwise, so a count is
//! always produced.

use tiktoken_rs::{get_bpe_from_model, CoreBPE};

/// Token counter bound to one model's tokenizer.
///
/// Construction never fails; unknown models degrade to a heuristic estimate.
///
/// # Example
///
/// ```
/// use chainlens::tokens::TokenCounter;
///
/// let counter = TokenCounter::for_model("gpt-3.5-turbo");
/// assert!(counter.count("Hello, world!") > 0);
/// ```
pub struct TokenCounter {
    model: String,
    encoder: Option<CoreBPE>,
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("model", &self.model)
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

impl TokenCounter {
    /// Create a counter for the given model identifier.
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
            encoder: resolve_encoder(model),
        }
    }

    /// Model identifier this counter was built for.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Count tokens in the given text.
    #[must_use]
    pub fn count(&self, text: &str) -> u64 {
        match &self.encoder {
            Some(encoder) => encoder.encode_with_special_tokens(text).len() as u64,
            // ~4 characters per token
            None => text.len().div_ceil(4) as u64,
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::for_model("gpt-3.5-turbo")
    }
}

/// Resolve a tiktoken encoder for a model, tolerating versioned names.
fn resolve_encoder(model: &str) -> Option<CoreBPE> {
    if let Ok(bpe) = get_bpe_from_model(model) {
        return Some(bpe);
    }

    let model_lower = model.to_lowercase();
    if model_lower.contains("gpt-4") || model_lower.contains("gpt4") {
        return get_bpe_from_model("gpt-4").ok();
    }
    if model_lower.contains("gpt-3.5") || model_lower.contains("gpt3") {
        return get_bpe_from_model("gpt-3.5-turbo").ok();
    }

    // cl100k_base is a reasonable default for unrecognized chat models
    tiktoken_rs::cl100k_base().ok()
}
