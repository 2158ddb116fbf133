//! The Chat Completions-compatible adapter.
//!
//! One implementation serves every backend that speaks the OpenAI Chat
//! Completions wire: DeepSeek, xAI Grok, and the OpenRouter gateway. The
//! instances differ only in name, base URL and credential.

mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

use self::input::ChatRequest;
use self::output::ChatStreamProcessor;

use crate::error::{LlmError, Result};
use crate::provider::stream::drive_sse;
use crate::provider::{EventStream, Provider, ensure_success, http_client};
use crate::registry::ModelRegistry;
use crate::request::{ProviderRequest, RequestContext};

const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/v1";
const XAI_API_URL: &str = "https://api.x.ai/v1";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

pub struct ChatCompatProvider {
    name: &'static str,
    client: Client,
    base_url: String,
    registry: Arc<ModelRegistry>,
    api_key: SecretString,
}

impl ChatCompatProvider {
    pub fn deepseek(registry: Arc<ModelRegistry>, api_key: SecretString) -> Result<Self> {
        Self::new("deepseek", DEEPSEEK_API_URL, registry, api_key)
    }

    pub fn xai(registry: Arc<ModelRegistry>, api_key: SecretString) -> Result<Self> {
        Self::new("xai", XAI_API_URL, registry, api_key)
    }

    pub fn openrouter(registry: Arc<ModelRegistry>, api_key: SecretString) -> Result<Self> {
        Self::new("openrouter", OPENROUTER_API_URL, registry, api_key)
    }

    fn new(name: &'static str, base_url: &str, registry: Arc<ModelRegistry>, api_key: SecretString) -> Result<Self> {
        Ok(Self {
            name,
            client: http_client(name)?,
            base_url: base_url.to_string(),
            registry,
            api_key,
        })
    }

    /// Point the adapter at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Provider for ChatCompatProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn stream(&self, request: ProviderRequest, context: &RequestContext) -> Result<EventStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let model = request.model.clone();

        let (wire_request, sentinel_tools) = ChatRequest::build(&request, &self.registry);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize {} request: {e}", self.name);
            LlmError::Internal(format!("{} request serialization: {e}", self.name))
        })?;

        context.log_request(
            self.name,
            &model,
            &serde_json::to_value(&wire_request).unwrap_or(serde_json::Value::Null),
        );

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key.expose_secret()))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportFailure(format!("failed to reach {}: {e}", self.name)))?;

        let response = ensure_success(self.name, response).await?;

        let frames = response.bytes_stream().eventsource();
        let processor = ChatStreamProcessor::new(self.name, model, sentinel_tools);

        Ok(drive_sse(frames, processor, context))
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use futures::StreamExt;
    use indoc::indoc;
    use std::sync::{Arc as StdArc, Mutex};
    use tokio::net::TcpListener;

    use super::*;
    use crate::events::StreamEvent;
    use crate::messages::Message;

    async fn spawn_mock(body: &'static str) -> (String, StdArc<Mutex<Option<HeaderMap>>>) {
        let captured = StdArc::new(Mutex::new(None));
        let handler_captured = captured.clone();

        let app = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap| {
                let captured = handler_captured.clone();
                async move {
                    *captured.lock().unwrap() = Some(headers);
                    (
                        StatusCode::OK,
                        [(header::CONTENT_TYPE, "text/event-stream")],
                        Body::from(body),
                    )
                        .into_response()
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{address}/v1"), captured)
    }

    #[tokio::test]
    async fn bearer_auth_and_grammar_normalization() {
        let body = indoc! {r#"
            data: {"id":"chatcmpl-7","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}

            data: {"id":"chatcmpl-7","choices":[{"index":0,"delta":{"content":"!"}}]}

            data: {"id":"chatcmpl-7","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}

            data: {"id":"chatcmpl-7","choices":[],"usage":{"prompt_tokens":9,"completion_tokens":2}}

            data: [DONE]

        "#};

        let (base_url, captured) = spawn_mock(body).await;

        let provider = ChatCompatProvider::deepseek(
            StdArc::new(ModelRegistry::builtin()),
            SecretString::from("sk-deepseek-test".to_string()),
        )
        .unwrap()
        .with_base_url(base_url);

        let request = ProviderRequest::new("deepseek-chat", vec![Message::user("hello")]);
        let events: Vec<StreamEvent> = provider
            .stream(request, &RequestContext::default())
            .await
            .unwrap()
            .collect()
            .await;

        let headers = captured.lock().unwrap().clone().unwrap();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-deepseek-test");

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::MessageDelta { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hi!");

        let usage = events.iter().find_map(StreamEvent::usage).unwrap();
        assert_eq!(usage.input_tokens, 9);

        assert_eq!(events.iter().filter(|e| e.is_end()).count(), 1);
        assert!(matches!(events.last(), Some(StreamEvent::StreamEnd {})));
    }

    #[tokio::test]
    async fn mid_stream_disconnect_still_ends_cleanly() {
        // Stream cut off after one delta, no [DONE].
        let body = indoc! {r#"
            data: {"id":"chatcmpl-8","choices":[{"index":0,"delta":{"content":"par"}}]}

        "#};

        let (base_url, _captured) = spawn_mock(body).await;

        let provider = ChatCompatProvider::xai(
            StdArc::new(ModelRegistry::builtin()),
            SecretString::from("xai-test".to_string()),
        )
        .unwrap()
        .with_base_url(base_url);

        let request = ProviderRequest::new("grok-4", vec![Message::user("hello")]);
        let events: Vec<StreamEvent> = provider
            .stream(request, &RequestContext::default())
            .await
            .unwrap()
            .collect()
            .await;

        // Partial content still completes, and exactly one end is emitted.
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::MessageComplete { content, .. } if content == "par"))
        );
        assert_eq!(events.iter().filter(|e| e.is_end()).count(), 1);
        assert!(matches!(events.last(), Some(StreamEvent::StreamEnd {})));
    }
}
