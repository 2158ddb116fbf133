//! Provider adapters: one per backend, all emitting the shared event
//! grammar.
//!
//! Each adapter owns its wire format in an `input` (canonical → wire) and
//! `output` (wire → events) module pair. The streaming state machine that is
//! common to every HTTP backend — cancellation, pause, deadline, truncated
//! frame retry, the error/complete/end tail — lives in [`stream`] so the
//! adapters only implement frame parsing.

pub mod anthropic;
pub mod claude_cli;
pub mod google;
pub mod openai;
pub mod openai_chat;
pub mod test;

pub(crate) mod stream;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{LlmError, Result};
use crate::events::StreamEvent;
use crate::request::{ProviderRequest, RequestContext};

/// The per-request stream of grammar events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'static>>;

/// A backend adapter.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used in logs and quota keys.
    fn name(&self) -> &str;

    /// Issue the request and return the normalized event stream.
    ///
    /// Only pre-flight failures (credentials, serialization, connection
    /// refusal before any stream exists) surface as `Err`; everything after
    /// the first byte is delivered in-stream per the event grammar.
    async fn stream(&self, request: ProviderRequest, context: &RequestContext) -> Result<EventStream>;
}

/// Render an error as its in-stream event.
pub(crate) fn error_event(error: &LlmError) -> StreamEvent {
    StreamEvent::Error {
        error: error.to_string(),
        code: error.event_code(),
    }
}

/// Shared non-success handling for provider HTTP responses.
pub(crate) async fn ensure_success(provider: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    log::error!("{provider} API error ({status}): {message}");

    Err(LlmError::from_status(provider, status.as_u16(), message))
}

/// Default HTTP client for provider adapters.
pub(crate) fn http_client(provider: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| LlmError::Internal(format!("failed to build HTTP client for {provider}: {e}")))
}
