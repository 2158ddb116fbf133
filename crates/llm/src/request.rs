//! Per-request inputs and the cooperative control surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::messages::{Message, ToolDefinition};
use crate::request_log::RequestLogger;

/// Tuning knobs for a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Cap on generated tokens; defaults to the model's maximum.
    pub max_output_tokens: Option<u64>,
    /// Ask the provider for a JSON-only response where supported.
    pub json_output: bool,
    /// Extended-thinking token budget for reasoning models.
    pub thinking_budget_tokens: Option<u64>,
    /// Per-request deadline; expiry behaves like cancellation with a
    /// `timeout` error.
    pub deadline: Option<Duration>,
    /// Whether the orchestrator appends the assistant result to history.
    pub track_history: Option<bool>,
}

/// Fully-resolved input handed to one adapter.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Concrete model id (never a class).
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub params: RequestParams,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            params: RequestParams::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }
}

/// Process-wide pause flag.
///
/// While set, every active stream stops consuming its backend at the next
/// suspension point and winds down with a paused delta.
#[derive(Debug, Clone, Default)]
pub struct PauseSignal(Arc<AtomicBool>);

impl PauseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Control surface attached to a running request.
#[derive(Clone, Default)]
pub struct RequestContext {
    /// Cooperative cancellation; observed at every suspension point.
    pub cancel: CancellationToken,
    /// Process-wide pause flag.
    pub pause: PauseSignal,
    /// Absolute deadline, derived from [`RequestParams::deadline`].
    pub deadline: Option<tokio::time::Instant>,
    /// Request log sink, when logging is configured.
    pub logger: Option<RequestLogger>,
}

impl RequestContext {
    /// Log the outgoing wire request, when a sink is configured.
    pub fn log_request(&self, provider: &str, model: &str, request: &serde_json::Value) {
        if let Some(logger) = &self.logger {
            logger.log_request(provider, model, request);
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("paused", &self.pause.is_paused())
            .field("deadline", &self.deadline)
            .finish()
    }
}
