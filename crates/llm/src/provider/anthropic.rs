mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};

use self::input::AnthropicRequest;
use self::output::AnthropicStreamProcessor;

use crate::error::{LlmError, Result};
use crate::provider::stream::drive_sse;
use crate::provider::{EventStream, Provider, ensure_success, http_client};
use crate::registry::ModelRegistry;
use crate::request::{ProviderRequest, RequestContext};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    registry: Arc<ModelRegistry>,
    api_key: SecretString,
}

impl AnthropicProvider {
    pub fn new(registry: Arc<ModelRegistry>, api_key: SecretString) -> Result<Self> {
        Ok(Self {
            client: http_client("anthropic")?,
            base_url: DEFAULT_ANTHROPIC_API_URL.to_string(),
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
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(&self, request: ProviderRequest, context: &RequestContext) -> Result<EventStream> {
        let url = format!("{}/messages", self.base_url);
        let model = request.model.clone();

        let wire_request = AnthropicRequest::build(&request, &self.registry);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize Anthropic request: {e}");
            LlmError::Internal(format!("anthropic request serialization: {e}"))
        })?;

        context.log_request(
            self.name(),
            &model,
            &serde_json::to_value(&wire_request).unwrap_or(serde_json::Value::Null),
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportFailure(format!("failed to reach Anthropic: {e}")))?;

        let response = ensure_success(self.name(), response).await?;

        let frames = response.bytes_stream().eventsource();
        let processor = AnthropicStreamProcessor::new(model);

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

    async fn sse_handler(headers: HeaderMap, captured: StdArc<Mutex<Option<HeaderMap>>>) -> impl IntoResponse {
        *captured.lock().unwrap() = Some(headers);

        let body = indoc! {r#"
            event: message_start
            data: {"type":"message_start","message":{"id":"msg_mock","usage":{"input_tokens":7}}}

            event: content_block_start
            data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}

            event: content_block_delta
            data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi "}}

            event: content_block_delta
            data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"there"}}

            event: message_delta
            data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}

            event: message_stop
            data: {"type":"message_stop"}

        "#};

        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from(body),
        )
    }

    async fn spawn_mock() -> (String, StdArc<Mutex<Option<HeaderMap>>>) {
        let captured = StdArc::new(Mutex::new(None));
        let handler_captured = captured.clone();

        let app = Router::new().route(
            "/v1/messages",
            post(move |headers: HeaderMap| sse_handler(headers, handler_captured.clone())),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{address}/v1"), captured)
    }

    #[tokio::test]
    async fn streams_and_normalizes_a_mock_response() {
        let (base_url, captured) = spawn_mock().await;

        let provider = AnthropicProvider::new(
            StdArc::new(ModelRegistry::builtin()),
            SecretString::from("sk-ant-test".to_string()),
        )
        .unwrap()
        .with_base_url(base_url);

        let request = ProviderRequest::new("claude-sonnet-4-0", vec![Message::user("hello")]);
        let events: Vec<StreamEvent> = provider
            .stream(request, &RequestContext::default())
            .await
            .unwrap()
            .collect()
            .await;

        // Auth and version headers went out.
        let headers = captured.lock().unwrap().clone().unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant-test");
        assert_eq!(headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);

        // Normalized grammar came back.
        assert!(matches!(&events[0], StreamEvent::MessageStart { message_id } if message_id == "msg_mock"));

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::MessageDelta { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hi there");

        let usage = events.iter().find_map(StreamEvent::usage).unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 4);

        assert!(matches!(events.last(), Some(StreamEvent::StreamEnd {})));
        assert_eq!(events.iter().filter(|e| e.is_end()).count(), 1);
    }

    #[tokio::test]
    async fn http_429_surfaces_as_preflight_rate_limit() {
        let app = Router::new().route(
            "/v1/messages",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited") }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = AnthropicProvider::new(
            StdArc::new(ModelRegistry::builtin()),
            SecretString::from("sk-ant-test".to_string()),
        )
        .unwrap()
        .with_base_url(format!("http://{address}/v1"));

        let request = ProviderRequest::new("claude-sonnet-4-0", vec![Message::user("hello")]);
        let error = match provider.stream(request, &RequestContext::default()).await {
            Ok(_) => panic!("expected stream() to return an error"),
            Err(error) => error,
        };

        assert!(matches!(error, LlmError::RateLimited { .. }));
    }
}
