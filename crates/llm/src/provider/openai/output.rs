//! OpenAI Responses API SSE → event grammar.
//!
//! The Responses stream interleaves typed lifecycle events over output
//! items. Relevant here:
//!
//! - `response.created` — response id
//! - `response.output_item.added` — a message / function_call / reasoning
//!   item begins
//! - `response.output_text.delta` — text fragments
//! - `response.reasoning_summary_text.delta` — reasoning summaries, which
//!   surface as `thinking_delta`
//! - `response.function_call_arguments.delta` / `.done` — streamed tool
//!   arguments, assembled per item
//! - `response.completed` / `response.failed` — terminal, with usage
//!
//! Unknown event types are skipped, matching the additive evolution of the
//! wire.

use serde::Deserialize;

use crate::error::LlmError;
use crate::events::StreamEvent;
use crate::provider::error_event;
use crate::provider::stream::{
    MessageAccumulator, ProcessOutcome, SseProcessor, StreamClose, ToolCallAssembler, is_truncation,
};
use crate::usage::UsageRecord;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(super) enum ResponsesWireEvent {
    #[serde(rename = "response.created")]
    Created { response: WireResponse },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: WireItem },

    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },

    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryDelta { delta: String },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionArgumentsDelta { item_id: String, delta: String },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionArgumentsDone { item_id: String, arguments: String },

    #[serde(rename = "response.completed")]
    Completed { response: WireResponse },

    #[serde(rename = "response.failed")]
    Failed { response: WireResponse },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },

    /// Lifecycle noise we do not act on (`response.in_progress`,
    /// `response.output_item.done`, part boundaries, ...).
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    #[serde(default)]
    pub error: Option<WireResponseError>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireResponseError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: Option<WireInputDetails>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireInputDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

pub(super) struct ResponsesStreamProcessor {
    model: String,
    acc: MessageAccumulator,
    tools: ToolCallAssembler,
    usage: Option<UsageRecord>,
}

impl ResponsesStreamProcessor {
    pub(super) fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            acc: MessageAccumulator::new(),
            tools: ToolCallAssembler::new(),
            usage: None,
        }
    }

    fn absorb_usage(&mut self, usage: WireUsage) {
        let cached = usage.input_tokens_details.map(|d| d.cached_tokens).unwrap_or(0);
        self.usage = Some(
            UsageRecord::new(&self.model)
                .with_tokens(usage.input_tokens, usage.output_tokens)
                .with_cached(cached),
        );
    }
}

impl SseProcessor for ResponsesStreamProcessor {
    fn process(&mut self, _event_name: &str, data: &str) -> ProcessOutcome {
        if data.is_empty() || data.trim() == "[DONE]" {
            return ProcessOutcome::Continue(Vec::new());
        }

        let event = match sonic_rs::from_str::<ResponsesWireEvent>(data) {
            Ok(event) => event,
            Err(e) if is_truncation(&e.to_string(), data) => return ProcessOutcome::Truncated,
            Err(e) => {
                log::warn!("skipping unparseable OpenAI Responses frame: {e}");
                return ProcessOutcome::Continue(Vec::new());
            }
        };

        let events = match event {
            ResponsesWireEvent::Created { response } => {
                if let Some(id) = response.id {
                    self.acc.set_id(&id);
                }
                Vec::new()
            }

            ResponsesWireEvent::OutputItemAdded { item } => {
                if item.r#type.as_deref() == Some("function_call")
                    && let Some(item_id) = item.id
                {
                    self.tools.begin(
                        item_id,
                        item.call_id.unwrap_or_default(),
                        item.name.unwrap_or_default(),
                    );
                }
                Vec::new()
            }

            ResponsesWireEvent::OutputTextDelta { delta } => self.acc.text_delta(&delta),

            ResponsesWireEvent::ReasoningSummaryDelta { delta } => self.acc.thinking_delta(&delta, None),

            ResponsesWireEvent::FunctionArgumentsDelta { item_id, delta } => {
                self.tools.append_arguments(&item_id, &delta);
                Vec::new()
            }

            ResponsesWireEvent::FunctionArgumentsDone { item_id, arguments } => {
                // The done event is authoritative over accumulated deltas.
                self.tools.set_arguments(&item_id, arguments);
                Vec::new()
            }

            ResponsesWireEvent::Completed { response } => {
                if let Some(usage) = response.usage {
                    self.absorb_usage(usage);
                }
                return ProcessOutcome::Done(Vec::new());
            }

            ResponsesWireEvent::Failed { response } => {
                let message = response
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "response failed".to_string());
                log::error!("OpenAI response failed: {message}");

                if let Some(usage) = response.usage {
                    self.absorb_usage(usage);
                }

                return ProcessOutcome::Done(vec![error_event(&LlmError::ProtocolFailure(message))]);
            }

            ResponsesWireEvent::Error { message } => {
                log::error!("OpenAI stream error: {message}");
                vec![error_event(&LlmError::ProtocolFailure(message))]
            }

            ResponsesWireEvent::Other => Vec::new(),
        };

        ProcessOutcome::Continue(events)
    }

    fn finish(&mut self, close: StreamClose) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if close == StreamClose::Paused {
            events.extend(self.acc.pause_tail());
        } else {
            events.extend(self.tools.finalize());
            events.extend(self.acc.complete());
        }

        if let Some(usage) = self.usage.take() {
            events.push(StreamEvent::CostUpdate { usage });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    fn feed(processor: &mut ResponsesStreamProcessor, frames: &[&str]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for frame in frames {
            match processor.process("", frame) {
                ProcessOutcome::Continue(batch) | ProcessOutcome::Done(batch) => events.extend(batch),
                ProcessOutcome::Truncated => panic!("unexpected truncation"),
            }
        }
        events
    }

    #[test]
    fn output_text_stream_normalizes() {
        let mut processor = ResponsesStreamProcessor::new("gpt-5");

        let mut events = feed(
            &mut processor,
            &[
                r#"{"type":"response.created","response":{"id":"resp_1"}}"#,
                r#"{"type":"response.output_item.added","item":{"id":"item_1","type":"message"}}"#,
                r#"{"type":"response.output_text.delta","item_id":"item_1","delta":"Hello"}"#,
                r#"{"type":"response.output_text.delta","item_id":"item_1","delta":" world"}"#,
                r#"{"type":"response.completed","response":{"id":"resp_1","usage":{"input_tokens":8,"output_tokens":3,"input_tokens_details":{"cached_tokens":2}}}}"#,
            ],
        );
        events.extend(processor.finish(StreamClose::Finished));

        assert!(matches!(&events[0], StreamEvent::MessageStart { message_id } if message_id == "resp_1"));

        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageComplete { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(complete, "Hello world");

        let usage = events.iter().find_map(StreamEvent::usage).unwrap();
        assert_eq!(usage.input_tokens, 8);
        assert_eq!(usage.cached_tokens, 2);
    }

    #[test]
    fn function_call_arguments_done_is_authoritative() {
        let mut processor = ResponsesStreamProcessor::new("gpt-5");

        let mut events = feed(
            &mut processor,
            &[
                r#"{"type":"response.created","response":{"id":"resp_2"}}"#,
                r#"{"type":"response.output_item.added","item":{"id":"item_fc","type":"function_call","call_id":"call_77","name":"lookup"}}"#,
                r#"{"type":"response.function_call_arguments.delta","item_id":"item_fc","delta":"{\"q\""}"#,
                r#"{"type":"response.function_call_arguments.done","item_id":"item_fc","arguments":"{\"q\":\"rust\"}"}"#,
                r#"{"type":"response.completed","response":{"id":"resp_2","usage":{"input_tokens":5,"output_tokens":7}}}"#,
            ],
        );
        events.extend(processor.finish(StreamClose::Finished));

        let StreamEvent::ToolStart { tool_calls } = events
            .iter()
            .find(|e| matches!(e, StreamEvent::ToolStart { .. }))
            .unwrap()
        else {
            unreachable!()
        };

        assert_eq!(tool_calls[0].id, "call_77");
        assert_eq!(tool_calls[0].name, "lookup");
        assert_eq!(tool_calls[0].arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn reasoning_summaries_surface_as_thinking() {
        let mut processor = ResponsesStreamProcessor::new("o3");

        let events = feed(
            &mut processor,
            &[r#"{"type":"response.reasoning_summary_text.delta","delta":"weighing options"}"#],
        );

        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::ThinkingDelta { content, .. } if content == "weighing options"))
        );
    }

    #[test]
    fn unknown_lifecycle_events_are_skipped() {
        let mut processor = ResponsesStreamProcessor::new("gpt-5");

        let events = feed(
            &mut processor,
            &[r#"{"type":"response.content_part.added","part":{"type":"output_text"}}"#],
        );
        assert!(events.is_empty());
    }
}
