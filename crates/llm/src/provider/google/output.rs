//! Gemini SSE → event grammar.
//!
//! Each frame is a `GenerateContentResponse` fragment: candidate content
//! parts (text, inline binary, function calls) plus `usageMetadata`, which
//! is cumulative — the last chunk's numbers win. Inline binary parts emit
//! `file_complete`; function calls arrive whole (no argument streaming on
//! this wire) and are still funneled through the assembler so one
//! authoritative `tool_start` goes out at close.

use serde::Deserialize;
use serde_json::Value;

use crate::error::LlmError;
use crate::events::StreamEvent;
use crate::provider::error_event;
use crate::provider::stream::{
    MessageAccumulator, ProcessOutcome, SseProcessor, StreamClose, ToolCallAssembler, is_truncation,
};
use crate::usage::UsageRecord;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GoogleStreamChunk {
    #[serde(default)]
    pub candidates: Vec<WireCandidate>,
    #[serde(default)]
    pub usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireCandidate {
    #[serde(default)]
    pub content: Option<WireContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireContent {
    #[serde(default)]
    pub parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WirePart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<WireInlineData>,
    #[serde(default)]
    pub function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireInlineData {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WireUsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
    #[serde(default)]
    pub cached_content_token_count: u64,
}

pub(super) struct GoogleStreamProcessor {
    model: String,
    acc: MessageAccumulator,
    tools: ToolCallAssembler,
    next_call_index: u32,
    usage: Option<UsageRecord>,
    image_count: u64,
}

impl GoogleStreamProcessor {
    pub(super) fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            acc: MessageAccumulator::new(),
            tools: ToolCallAssembler::new(),
            next_call_index: 0,
            usage: None,
            image_count: 0,
        }
    }
}

impl SseProcessor for GoogleStreamProcessor {
    fn process(&mut self, _event_name: &str, data: &str) -> ProcessOutcome {
        if data.is_empty() {
            return ProcessOutcome::Continue(Vec::new());
        }

        let chunk = match sonic_rs::from_str::<GoogleStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) if is_truncation(&e.to_string(), data) => return ProcessOutcome::Truncated,
            Err(e) => {
                log::warn!("skipping unparseable Google frame: {e}");
                return ProcessOutcome::Continue(Vec::new());
            }
        };

        if let Some(metadata) = chunk.usage_metadata {
            // Cumulative counters; the last chunk is authoritative.
            self.usage = Some(
                UsageRecord::new(&self.model)
                    .with_tokens(metadata.prompt_token_count, metadata.candidates_token_count)
                    .with_cached(metadata.cached_content_token_count),
            );
        }

        let mut events = Vec::new();

        for candidate in chunk.candidates {
            if let Some(content) = candidate.content {
                for part in content.parts {
                    if let Some(text) = part.text {
                        events.extend(self.acc.text_delta(&text));
                    }

                    if let Some(inline) = part.inline_data {
                        self.image_count += 1;
                        events.extend(self.acc.file(&inline.mime_type, &inline.data));
                    }

                    if let Some(call) = part.function_call {
                        // Whole call in one part; no id on this wire.
                        let key = self.next_call_index.to_string();
                        self.next_call_index += 1;
                        self.tools
                            .begin(&key, format!("call_g{}", self.next_call_index), call.name);
                        self.tools.set_arguments(&key, call.args.to_string());
                    }
                }
            }

            if let Some(reason) = candidate.finish_reason
                && (reason == "SAFETY" || reason == "PROHIBITED_CONTENT")
            {
                events.push(error_event(&LlmError::ContentBlocked {
                    provider: "google".to_string(),
                    message: format!("generation stopped: {reason}"),
                }));
            }
        }

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

        if let Some(mut usage) = self.usage.take() {
            usage.image_count = self.image_count;
            events.push(StreamEvent::CostUpdate { usage });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    fn feed(processor: &mut GoogleStreamProcessor, frames: &[&str]) -> Vec<StreamEvent> {
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
    fn text_parts_stream_and_usage_lands_on_last_chunk() {
        let mut processor = GoogleStreamProcessor::new("gemini-2.5-flash");

        let mut events = feed(
            &mut processor,
            &[
                r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#,
                r#"{"candidates":[{"content":{"parts":[{"text":"lo"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":13,"candidatesTokenCount":2}}"#,
            ],
        );
        events.extend(processor.finish(StreamClose::Finished));

        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageComplete { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(complete, "Hello");

        let usage = events.iter().find_map(StreamEvent::usage).unwrap();
        assert_eq!(usage.input_tokens, 13);
        assert_eq!(usage.output_tokens, 2);
    }

    #[test]
    fn inline_data_emits_file_complete() {
        let mut processor = GoogleStreamProcessor::new("imagen-3");

        let mut events = feed(
            &mut processor,
            &[
                r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}],"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":0}}"#,
            ],
        );
        events.extend(processor.finish(StreamClose::Finished));

        let file = events
            .iter()
            .find(|e| matches!(e, StreamEvent::FileComplete { .. }))
            .unwrap();
        let StreamEvent::FileComplete {
            mime_type,
            data_format,
            data,
            ..
        } = file
        else {
            unreachable!()
        };

        assert_eq!(mime_type, "image/png");
        assert_eq!(data_format, "base64");
        assert_eq!(data, "QUJD");

        let usage = events.iter().find_map(StreamEvent::usage).unwrap();
        assert_eq!(usage.image_count, 1);
    }

    #[test]
    fn function_calls_arrive_whole() {
        let mut processor = GoogleStreamProcessor::new("gemini-2.5-pro");

        let mut events = feed(
            &mut processor,
            &[r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"lookup","args":{"q":"rust"}}}]},"finishReason":"STOP"}]}"#],
        );
        events.extend(processor.finish(StreamClose::Finished));

        let StreamEvent::ToolStart { tool_calls } = events
            .iter()
            .find(|e| matches!(e, StreamEvent::ToolStart { .. }))
            .unwrap()
        else {
            unreachable!()
        };

        assert_eq!(tool_calls[0].name, "lookup");
        assert_eq!(tool_calls[0].arguments, r#"{"q":"rust"}"#);
        assert!(!tool_calls[0].id.is_empty());
    }

    #[test]
    fn safety_stop_maps_to_content_blocked() {
        let mut processor = GoogleStreamProcessor::new("gemini-2.5-flash");

        let events = feed(
            &mut processor,
            &[r#"{"candidates":[{"finishReason":"SAFETY"}]}"#],
        );

        assert!(matches!(&events[0], StreamEvent::Error { code: Some(451), .. }));
    }
}
