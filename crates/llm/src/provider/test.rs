//! The in-process deterministic backend.
//!
//! Drives the full event grammar without any network, for tests and local
//! development:
//!
//! - `test-standard` / `test-mini`: echo responses, streamed as two deltas.
//! - a prompt mentioning "tool" with tools supplied: one forced tool call.
//! - `test-rate-limit`: a single 429-shaped `error`, then `stream_end`.
//! - `test-error`: a transport-shaped `error`, then `stream_end`.
//! - `test-thinking`: thinking deltas ahead of the echo response.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::{LlmError, Result};
use crate::events::{StreamEvent, ToolCallData};
use crate::provider::stream::MessageAccumulator;
use crate::provider::{EventStream, Provider, error_event};
use crate::request::{ProviderRequest, RequestContext};
use crate::token_estimate;
use crate::usage::UsageRecord;

pub struct TestProvider;

impl TestProvider {
    pub fn new() -> Self {
        Self
    }

    fn synthesize(&self, request: &ProviderRequest) -> Vec<StreamEvent> {
        match request.model.as_str() {
            "test-rate-limit" => vec![
                error_event(&LlmError::RateLimited {
                    provider: "test".to_string(),
                    message: "429: rate limit exceeded (simulated)".to_string(),
                }),
                StreamEvent::StreamEnd {},
            ],

            "test-error" => vec![
                error_event(&LlmError::TransportFailure("connection reset (simulated)".to_string())),
                StreamEvent::StreamEnd {},
            ],

            model => {
                let prompt = last_user_text(request);
                let mut acc = MessageAccumulator::new();
                let mut events = Vec::new();

                if model == "test-thinking" {
                    events.extend(acc.thinking_delta("Considering the request...", None));
                    events.extend(acc.thinking_delta(" done.", None));
                }

                let forced_tool = request
                    .tools
                    .first()
                    .filter(|_| prompt.to_ascii_lowercase().contains("tool"));

                let content = match forced_tool {
                    Some(tool) => format!("Calling the {} tool.", tool.name),
                    None => format!("Echo: {prompt} (from {model})"),
                };

                // Stream in two fragments so delta ordering is observable.
                let split = content.len() / 2;
                let split = content
                    .char_indices()
                    .map(|(i, _)| i)
                    .take_while(|i| *i <= split)
                    .last()
                    .unwrap_or(0);
                events.extend(acc.text_delta(&content[..split]));
                events.extend(acc.text_delta(&content[split..]));

                if let Some(tool) = forced_tool {
                    events.push(StreamEvent::ToolStart {
                        tool_calls: vec![ToolCallData {
                            id: format!("call_test_{}", tool.name),
                            name: tool.name.clone(),
                            arguments: "{}".to_string(),
                        }],
                    });
                }

                events.extend(acc.complete());

                let input_tokens = request
                    .messages
                    .iter()
                    .map(token_estimate::message_tokens)
                    .sum::<u64>()
                    .max(10);
                let output_tokens = token_estimate::text_tokens(&content).max(20);

                events.push(StreamEvent::CostUpdate {
                    usage: UsageRecord::new(model).with_tokens(input_tokens, output_tokens),
                });
                events.push(StreamEvent::StreamEnd {});
                events
            }
        }
    }
}

impl Default for TestProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for TestProvider {
    fn name(&self) -> &str {
        "test"
    }

    async fn stream(&self, request: ProviderRequest, context: &RequestContext) -> Result<EventStream> {
        context.log_request(
            self.name(),
            &request.model,
            &serde_json::json!({
                "model": request.model,
                "messages": request.messages,
                "tools": request.tools,
            }),
        );

        let queue: VecDeque<StreamEvent> = self.synthesize(&request).into();
        let cancel = context.cancel.clone();
        let pause = context.pause.clone();

        Ok(Box::pin(futures::stream::unfold(
            (queue, cancel, pause, false),
            |(mut queue, cancel, pause, mut winding_down)| async move {
                // Yield so cancellation has a suspension point to land on.
                tokio::task::yield_now().await;

                if !winding_down && (cancel.is_cancelled() || pause.is_paused()) {
                    queue.clear();
                    if cancel.is_cancelled() {
                        queue.push_back(error_event(&LlmError::Cancelled));
                    }
                    queue.push_back(StreamEvent::StreamEnd {});
                    winding_down = true;
                }

                queue
                    .pop_front()
                    .map(|event| (event, (queue, cancel, pause, winding_down)))
            },
        )))
    }
}

fn last_user_text(request: &ProviderRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find_map(|message| match message {
            crate::messages::Message::Conversational {
                role: crate::messages::Role::User,
                content,
                ..
            } => Some(content.text()),
            _ => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::messages::{Message, ToolDefinition};

    async fn collect(request: ProviderRequest) -> Vec<StreamEvent> {
        let provider = TestProvider::new();
        let stream = provider.stream(request, &RequestContext::default()).await.unwrap();
        stream.collect().await
    }

    #[tokio::test]
    async fn echo_streams_start_deltas_complete_cost_end() {
        let request = ProviderRequest::new("test-standard", vec![Message::user("Hello")]);
        let events = collect(request).await;

        assert!(matches!(events.first(), Some(StreamEvent::MessageStart { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::StreamEnd {})));

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::MessageDelta { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Echo: Hello (from test-standard)");

        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageComplete { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(complete, text);

        let usage = events.iter().find_map(StreamEvent::usage).unwrap();
        assert!(usage.input_tokens >= 10);
        assert!(usage.output_tokens >= 20);
    }

    #[tokio::test]
    async fn tool_prompt_forces_a_tool_call() {
        let request = ProviderRequest::new("test-standard", vec![Message::user("please use a tool")])
            .with_tools(vec![ToolDefinition::new("lookup", "Look things up")]);
        let events = collect(request).await;

        let StreamEvent::ToolStart { tool_calls } = events
            .iter()
            .find(|e| matches!(e, StreamEvent::ToolStart { .. }))
            .unwrap()
        else {
            unreachable!()
        };

        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "lookup");
        assert_eq!(tool_calls[0].arguments, "{}");

        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageComplete { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert!(complete.contains("lookup"));
    }

    #[tokio::test]
    async fn rate_limit_model_emits_429_error_then_end() {
        let request = ProviderRequest::new("test-rate-limit", vec![Message::user("hi")]);
        let events = collect(request).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            StreamEvent::Error { error, code: Some(429) } if error.contains("429")
        ));
        assert!(matches!(&events[1], StreamEvent::StreamEnd {}));
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_events() {
        let provider = TestProvider::new();
        let context = RequestContext::default();
        context.cancel.cancel();

        let request = ProviderRequest::new("test-standard", vec![Message::user("Hello")]);
        let events: Vec<_> = provider.stream(request, &context).await.unwrap().collect().await;

        assert!(matches!(&events[0], StreamEvent::Error { error, .. } if error == "cancelled"));
        assert!(matches!(events.last(), Some(StreamEvent::StreamEnd {})));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn thinking_model_emits_thinking_deltas_first() {
        let request = ProviderRequest::new("test-thinking", vec![Message::user("ponder")]);
        let events = collect(request).await;

        let first_content_event = events
            .iter()
            .find(|e| {
                matches!(
                    e,
                    StreamEvent::ThinkingDelta { .. } | StreamEvent::MessageDelta { .. }
                )
            })
            .unwrap();
        assert!(matches!(first_content_event, StreamEvent::ThinkingDelta { .. }));
    }
}
