//! The Google Gemini adapter.

mod input;
mod output;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};

use self::input::GoogleRequest;
use self::output::GoogleStreamProcessor;

use crate::error::{LlmError, Result};
use crate::provider::stream::drive_sse;
use crate::provider::{EventStream, Provider, ensure_success, http_client};
use crate::request::{ProviderRequest, RequestContext};

const DEFAULT_GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl GoogleProvider {
    pub fn new(api_key: SecretString) -> Result<Self> {
        Ok(Self {
            client: http_client("google")?,
            base_url: DEFAULT_GOOGLE_API_URL.to_string(),
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
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn stream(&self, request: ProviderRequest, context: &RequestContext) -> Result<EventStream> {
        let model = request.model.clone();
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url,
            model,
            self.api_key.expose_secret()
        );

        let wire_request = GoogleRequest::build(&request);

        let body = sonic_rs::to_vec(&wire_request).map_err(|e| {
            log::error!("Failed to serialize Google request: {e}");
            LlmError::Internal(format!("google request serialization: {e}"))
        })?;

        context.log_request(
            self.name(),
            &model,
            &serde_json::to_value(&wire_request).unwrap_or(serde_json::Value::Null),
        );

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| LlmError::TransportFailure(format!("failed to reach Google: {e}")))?;

        let response = ensure_success(self.name(), response).await?;

        let frames = response.bytes_stream().eventsource();
        let processor = GoogleStreamProcessor::new(model);

        Ok(drive_sse(frames, processor, context))
    }
}
