//! Usage records: what a single request actually consumed.

use std::collections::HashMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Token and image consumption for one request, created by the adapter at
/// stream completion (or best-effort on error) and consumed by the cost
/// engine and the quota manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Concrete model id that served the request.
    pub model: String,
    /// Prompt-side tokens.
    pub input_tokens: u64,
    /// Completion-side tokens.
    pub output_tokens: u64,
    /// Tokens served from the provider's prompt cache.
    pub cached_tokens: u64,
    /// Generated images, for image-generation models.
    pub image_count: u64,
    /// Provider-specific extras (request ids, finish reasons, …).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// When the usage was observed; drives time-of-day pricing.
    pub timestamp: Timestamp,
}

impl UsageRecord {
    /// A usage record for the given model, stamped now.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
            image_count: 0,
            metadata: HashMap::new(),
            timestamp: Timestamp::now(),
        }
    }

    /// Set the token counts.
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    /// Set the cached-token count.
    pub fn with_cached(mut self, cached: u64) -> Self {
        self.cached_tokens = cached;
        self
    }

    /// Set the generated-image count.
    pub fn with_images(mut self, images: u64) -> Self {
        self.image_count = images;
        self
    }

    /// Total tokens, input plus output.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
