//! Provider-agnostic LLM streaming and orchestration.
//!
//! One request/response abstraction over heterogeneous remote backends
//! (OpenAI, Anthropic, Google, xAI, DeepSeek, OpenRouter, a subprocess
//! CLI, and an in-process test backend):
//!
//! - a canonical message/tool schema ([`messages`]) converted to each
//!   backend's wire format by its adapter,
//! - a single typed event grammar ([`events::StreamEvent`]) with strict
//!   per-request ordering, emitted by every adapter,
//! - model selection from capability classes under key and quota
//!   constraints ([`registry`], [`selector`]),
//! - real-time cost and quota accounting, including tiered and
//!   time-of-day pricing ([`cost`], the `quota` crate),
//! - a bounded, self-compacting conversation history with LLM-assisted
//!   summarization ([`history`]).
//!
//! The entry point is [`Engine::run`]:
//!
//! ```no_run
//! use llm::{Engine, Message, RequestParams, StreamEvent};
//! use futures::StreamExt;
//!
//! # async fn demo() -> llm::Result<()> {
//! let engine = Engine::from_env();
//!
//! let mut handle = engine
//!     .run("standard", vec![Message::user("Hello")], Vec::new(), RequestParams::default())
//!     .await?;
//!
//! while let Some(event) = handle.events.next().await {
//!     if let StreamEvent::MessageDelta { content, .. } = &event {
//!         print!("{content}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod router;
mod selector;
mod token_estimate;

pub mod request_log;

pub mod cost;
pub mod events;
pub mod history;
pub mod messages;
pub mod provider;
pub mod registry;
pub mod request;
pub mod usage;

pub use config::{Config, ProviderId};
pub use engine::{Engine, EngineBuilder, EventSink, RunHandle};
pub use error::{LlmError, Result};
pub use events::{StreamEvent, ToolCallData};
pub use messages::{
    ContentPart, ImageDetail, Message, MessageContent, MessageStatus, ParamType, ParameterSchema, Role,
    ToolDefinition, ToolOutputContent, ToolParameters,
};
pub use registry::{ModelClass, ModelEntry, ModelRegistry, Price};
pub use request::{PauseSignal, ProviderRequest, RequestContext, RequestParams};
pub use request_log::RequestLogger;
pub use router::{ProviderRouter, RoutedModel};
pub use selector::ModelSelector;
pub use usage::UsageRecord;
