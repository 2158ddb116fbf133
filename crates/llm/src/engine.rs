//! The request orchestrator: the public entry point of the core.
//!
//! `run` resolves a model (or picks one from a class), routes it to an
//! adapter, attaches the cancellation/pause/deadline surface, and returns
//! the event stream wrapped with the process-wide bookkeeping: cost and
//! quota metering on usage events, request logging, history append after
//! completion, and the exactly-one-`stream_end` guarantee.

use std::sync::Arc;

use async_trait::async_trait;
use config::{Config, ProviderId};
use futures::StreamExt;
use quota::QuotaManager;
use tokio_util::sync::CancellationToken;

use crate::cost::{CostEngine, CostSnapshot};
use crate::error::{LlmError, Result};
use crate::events::{StreamEvent, ToolCallData};
use crate::history::{HistoryStore, Summarizer};
use crate::messages::{Message, ToolDefinition};
use crate::provider::{EventStream, Provider, error_event};
use crate::registry::{ModelClass, ModelRegistry};
use crate::request::{PauseSignal, ProviderRequest, RequestContext, RequestParams};
use crate::request_log::RequestLogger;
use crate::router::ProviderRouter;
use crate::selector::ModelSelector;

/// Default extended-thinking budget for reasoning-class models when the
/// caller does not set one.
const DEFAULT_THINKING_BUDGET: u64 = 8_192;

/// A running request: its event stream plus the cancel handle.
pub struct RunHandle {
    pub events: EventStream,
    pub cancel: CancellationToken,
    /// Concrete model id the request was routed to.
    pub model: String,
    pub provider: ProviderId,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("model", &self.model)
            .field("provider", &self.provider)
            .finish()
    }
}

impl RunHandle {
    /// Drain the stream into a vector. Test and batch convenience.
    pub async fn collect(self) -> Vec<StreamEvent> {
        self.events.collect().await
    }

    /// Deliver every event to a callback sink.
    pub async fn forward(mut self, sink: &EventSink) {
        while let Some(event) = self.events.next().await {
            if let StreamEvent::Error { error, .. } = &event
                && let Some(on_error) = &sink.on_error
            {
                on_error(error);
            }

            (sink.on_event)(&event);
        }
    }
}

/// Callback-based event delivery for callers that prefer push over pull.
pub struct EventSink {
    pub on_event: Box<dyn Fn(&StreamEvent) + Send + Sync>,
    pub on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl EventSink {
    pub fn new(on_event: impl Fn(&StreamEvent) + Send + Sync + 'static) -> Self {
        Self {
            on_event: Box::new(on_event),
            on_error: None,
        }
    }

    pub fn with_error_handler(mut self, on_error: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }
}

struct EngineInner {
    registry: Arc<ModelRegistry>,
    router: ProviderRouter,
    cost: CostEngine,
    quota: Arc<QuotaManager>,
    history: HistoryStore,
    pause: PauseSignal,
    logger: Option<RequestLogger>,
}

/// The orchestration engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub struct EngineBuilder {
    config: Config,
    registry: Option<ModelRegistry>,
    quota: Option<Arc<QuotaManager>>,
    adapter_overrides: Vec<(ProviderId, Arc<dyn Provider>)>,
}

impl EngineBuilder {
    pub fn registry(mut self, registry: ModelRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn quota(mut self, quota: Arc<QuotaManager>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Replace an adapter instance (tests pointing at mock endpoints).
    pub fn adapter(mut self, provider: ProviderId, adapter: Arc<dyn Provider>) -> Self {
        self.adapter_overrides.push((provider, adapter));
        self
    }

    pub fn build(self) -> Engine {
        let config = Arc::new(self.config);
        let registry = Arc::new(self.registry.unwrap_or_else(ModelRegistry::builtin));

        let mut router = ProviderRouter::new(config.clone(), registry.clone());
        for (provider, adapter) in self.adapter_overrides {
            router.set_adapter(provider, adapter);
        }

        let logger = config.request_log_dir.as_ref().map(RequestLogger::new);

        Engine {
            inner: Arc::new(EngineInner {
                cost: CostEngine::new(registry.clone()),
                history: HistoryStore::new(
                    config.history_token_ceiling,
                    config.history_floor,
                    config.ai_name.clone(),
                    config.your_name.clone(),
                ),
                quota: self.quota.unwrap_or_default(),
                router,
                registry,
                pause: PauseSignal::new(),
                logger,
            }),
        }
    }
}

impl Engine {
    /// Build from explicit configuration.
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    /// Build from the process environment.
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            registry: None,
            quota: None,
            adapter_overrides: Vec::new(),
        }
    }

    /// The process-wide pause flag consulted by every active stream.
    pub fn pause_signal(&self) -> PauseSignal {
        self.inner.pause.clone()
    }

    /// The quota manager, for limit registration and inspection.
    pub fn quota(&self) -> &QuotaManager {
        &self.inner.quota
    }

    /// Aggregate cost snapshot.
    pub fn cost_snapshot(&self) -> CostSnapshot {
        self.inner.cost.snapshot()
    }

    /// Current conversation history.
    pub fn history_snapshot(&self) -> Vec<Message> {
        self.inner.history.snapshot()
    }

    /// Clear the conversation history.
    pub fn reset_history(&self) {
        self.inner.history.reset();
    }

    /// The model registry backing this engine.
    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    /// Run one request against a concrete model id, an alias, or a model
    /// class name (e.g. `"standard"`, `"mini"`).
    ///
    /// Pre-flight failures (unknown model, unusable provider) return
    /// `Err`; everything after that is delivered in-stream, ending with
    /// exactly one `stream_end`.
    pub async fn run(
        &self,
        model_or_class: &str,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        params: RequestParams,
    ) -> Result<RunHandle> {
        let inner = &self.inner;

        // A class name selects a concrete model under key/quota
        // constraints; anything else is treated as a model id or alias.
        let requested = if let Some(class) = ModelRegistry::parse_class(model_or_class) {
            let selector = ModelSelector::new(&inner.registry, &inner.router, &inner.quota);
            selector.select(class)?
        } else {
            model_or_class.to_string()
        };

        let route = inner.router.route(&requested)?;

        let mut params = params;
        if params.thinking_budget_tokens.is_none()
            && (inner.registry.in_class(ModelClass::Reasoning, &requested)
                || inner.registry.in_class(ModelClass::Monologue, &requested))
        {
            params.thinking_budget_tokens = Some(DEFAULT_THINKING_BUDGET);
        }

        let track_history = params.track_history.unwrap_or(true);
        let cancel = CancellationToken::new();

        let context = RequestContext {
            cancel: cancel.clone(),
            pause: inner.pause.clone(),
            deadline: params.deadline.map(|d| tokio::time::Instant::now() + d),
            logger: inner.logger.clone(),
        };

        let request = ProviderRequest {
            model: route.model_id.clone(),
            messages,
            tools,
            params,
        };

        log::debug!(
            "dispatching request for {} via {} (requested '{}')",
            route.model_id,
            route.provider,
            model_or_class
        );

        // Quota exhaustion is advisory: the request proceeds (the caller
        // chose this model, or the selector fell through to pass B), with
        // a recoverable error event ahead of the content.
        let over_quota = !inner.quota.has_quota(route.provider.as_str(), &route.model_id);
        if over_quota {
            log::warn!("proceeding over quota for {}/{}", route.provider, route.model_id);
        }

        let source: EventStream = match route.adapter.stream(request, &context).await {
            Ok(stream) => stream,
            // Pre-flight configuration problems surface as errors; anything
            // else still becomes a well-formed stream.
            Err(e @ (LlmError::ConfigurationMissing { .. } | LlmError::ModelUnknown(_))) => return Err(e),
            Err(e) => {
                log::warn!("adapter failed before streaming: {e}");
                Box::pin(futures::stream::iter(vec![error_event(&e), StreamEvent::StreamEnd {}]))
            }
        };

        let source: EventStream = if over_quota {
            let advisory = error_event(&LlmError::QuotaExceeded {
                provider: route.provider.to_string(),
                model: route.model_id.clone(),
            });
            Box::pin(futures::stream::iter(vec![advisory]).chain(source))
        } else {
            source
        };

        let events = self.wrap_stream(source, route.provider, track_history);

        Ok(RunHandle {
            events,
            cancel,
            model: route.model_id,
            provider: route.provider,
        })
    }

    /// Attach metering, history tracking and the end-guard to an adapter
    /// stream.
    fn wrap_stream(&self, source: EventStream, provider: ProviderId, track_history: bool) -> EventStream {
        struct RunState {
            engine: Engine,
            source: EventStream,
            provider: ProviderId,
            track_history: bool,
            final_text: Option<String>,
            tool_calls: Vec<ToolCallData>,
            end_sent: bool,
        }

        let state = RunState {
            engine: self.clone(),
            source,
            provider,
            track_history,
            final_text: None,
            tool_calls: Vec::new(),
            end_sent: false,
        };

        Box::pin(futures::stream::unfold(state, |mut state| async move {
            loop {
                if state.end_sent {
                    return None;
                }

                match state.source.next().await {
                    Some(event) => {
                        match &event {
                            StreamEvent::CostUpdate { usage } => {
                                state.engine.meter(state.provider, usage);
                            }
                            StreamEvent::MessageComplete { content, .. } => {
                                state.final_text = Some(content.clone());
                            }
                            StreamEvent::ToolStart { tool_calls } => {
                                // The last (authoritative) tool_start wins.
                                state.tool_calls = tool_calls.clone();
                            }
                            StreamEvent::StreamEnd {} => {
                                state
                                    .engine
                                    .finish_run(state.track_history, state.final_text.take(), std::mem::take(&mut state.tool_calls))
                                    .await;
                                state.end_sent = true;
                            }
                            _ => {}
                        }

                        return Some((event, state));
                    }

                    None => {
                        // The adapter under-emitted; still deliver the
                        // terminal event and the side effects.
                        state
                            .engine
                            .finish_run(state.track_history, state.final_text.take(), std::mem::take(&mut state.tool_calls))
                            .await;
                        state.end_sent = true;
                        return Some((StreamEvent::StreamEnd {}, state));
                    }
                }
            }
        }))
    }

    fn meter(&self, provider: ProviderId, usage: &crate::usage::UsageRecord) {
        let cost = self.inner.cost.record(usage);
        self.inner.quota.track(
            provider.as_str(),
            &usage.model,
            usage.input_tokens,
            usage.output_tokens,
        );

        if cost > 0.0 {
            self.inner.quota.record_spend(provider.as_str(), cost);
        }
    }

    async fn finish_run(&self, track_history: bool, final_text: Option<String>, tool_calls: Vec<ToolCallData>) {
        if !track_history {
            return;
        }

        if let Some(text) = final_text
            && !text.is_empty()
        {
            self.inner.history.append(Message::assistant(text), self).await;
        }

        for call in tool_calls {
            self.inner
                .history
                .append(
                    Message::ToolCall {
                        call_id: call.id,
                        name: call.name,
                        arguments: call.arguments,
                    },
                    self,
                )
                .await;
        }
    }
}

#[async_trait]
impl Summarizer for Engine {
    /// History compaction reenters the engine with a summary-class
    /// request. History tracking is off for this internal pass, so the
    /// summarization itself never grows the history.
    async fn summarize(&self, transcript: &str) -> anyhow::Result<String> {
        let messages = vec![
            Message::system("Condense the following conversation excerpt into a short factual summary. Keep decisions, names and unresolved questions."),
            Message::user(transcript.to_string()),
        ];

        let params = RequestParams {
            track_history: Some(false),
            ..RequestParams::default()
        };

        let handle = self
            .run(&ModelClass::Summary.to_string(), messages, Vec::new(), params)
            .await
            .map_err(|e| anyhow::anyhow!("summarization dispatch failed: {e}"))?;

        let events = handle.collect().await;

        let mut summary = None;
        let mut error = None;

        for event in events {
            match event {
                StreamEvent::MessageComplete { content, .. } if !content.is_empty() => summary = Some(content),
                StreamEvent::Error { error: message, .. } => error = Some(message),
                _ => {}
            }
        }

        match (summary, error) {
            (Some(summary), _) => Ok(summary),
            (None, Some(error)) => Err(anyhow::anyhow!("summarization failed: {error}")),
            (None, None) => Err(anyhow::anyhow!("summarization produced no content")),
        }
    }
}
