//! The OpenAI adapter (Responses API).

mod input;
mod output;

use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};

use self::input::ResponsesRequest;
use self::output::ResponsesStreamProcessor;

use crate::error::{LlmError, Result};
use crate::provider::stream::drive_sse;
use crate::provider::{EventStream, Provider, ensure_success, http_client};
use crate::registry::ModelRegistry;
use crate::request::{ProviderRequest, RequestContext};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    registry: Arc<ModelRegistry>,
    api_key: SecretString,
}

impl OpenAiProvider {
    pub fn new(registry: Arc<ModelRegistry>, api_key: SecretString) -> Result<Self> {
        Ok(Self {
            client: http_client("openai")?,
            base_url: DEFAULT_OPENAI_API_URL.to_string(),
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
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: ProviderRequest, context: &RequestContext) -> Result<EventStream> {
        let url = format!("{}/responses", self.base_url);
        let model = request.model.clone();

        let wire_request = ResponsesRequest::build(&request, &self.registry);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize OpenAI request: {e}");
            LlmError::Internal(format!("openai request serialization: {e}"))
        })?;

        context.log_request(
            self.name(),
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
            .map_err(|e| LlmError::TransportFailure(format!("failed to reach OpenAI: {e}")))?;

        let response = ensure_success(self.name(), response).await?;

        let frames = response.bytes_stream().eventsource();
        let processor = ResponsesStreamProcessor::new(model);

        Ok(drive_sse(frames, processor, context))
    }
}
