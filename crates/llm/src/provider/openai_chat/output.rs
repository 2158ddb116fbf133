//! Chat Completions SSE → event grammar.
//!
//! Delta-based choices: text arrives in `delta.content`, DeepSeek's
//! reasoning extension in `delta.reasoning_content`, tool calls as indexed
//! fragments. `finish_reason` marks the terminal chunk; with
//! `stream_options.include_usage` the usage rides on a final, choiceless
//! chunk before `[DONE]`.

use serde::Deserialize;

use crate::error::LlmError;
use crate::events::{StreamEvent, ToolCallData};
use crate::provider::error_event;
use crate::provider::stream::{
    MessageAccumulator, ProcessOutcome, SseProcessor, StreamClose, ToolCallAssembler, is_truncation,
};
use crate::usage::UsageRecord;

use super::input::TOOL_SENTINEL_PREFIX;

#[derive(Debug, Deserialize)]
pub(super) struct ChatStreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<WireChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireChoice {
    #[serde(default)]
    pub delta: WireDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct WireDelta {
    #[serde(default)]
    pub content: Option<String>,
    /// DeepSeek reasoning extension.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens_details: Option<WirePromptDetails>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WirePromptDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

pub(super) struct ChatStreamProcessor {
    provider: String,
    model: String,
    acc: MessageAccumulator,
    tools: ToolCallAssembler,
    sentinel_tools: bool,
    usage: Option<UsageRecord>,
    finish_reason: Option<String>,
}

impl ChatStreamProcessor {
    pub(super) fn new(provider: impl Into<String>, model: impl Into<String>, sentinel_tools: bool) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            acc: MessageAccumulator::new(),
            tools: ToolCallAssembler::new(),
            sentinel_tools,
            usage: None,
            finish_reason: None,
        }
    }

    /// Parse the `TOOL_CALLS: [...]` sentinel line off the accumulated text.
    fn take_sentinel_calls(&mut self) -> Option<StreamEvent> {
        let payload = self.acc.take_trailing_line(TOOL_SENTINEL_PREFIX)?;

        #[derive(Deserialize)]
        struct SentinelCall {
            name: String,
            #[serde(default)]
            arguments: serde_json::Value,
        }

        let calls: Vec<SentinelCall> = match serde_json::from_str(&payload) {
            Ok(calls) => calls,
            Err(e) => {
                log::warn!("unparseable tool sentinel from {}: {e}", self.provider);
                return None;
            }
        };

        let tool_calls: Vec<ToolCallData> = calls
            .into_iter()
            .map(|call| ToolCallData {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name: call.name,
                arguments: if call.arguments.is_null() {
                    "{}".to_string()
                } else {
                    call.arguments.to_string()
                },
            })
            .collect();

        (!tool_calls.is_empty()).then_some(StreamEvent::ToolStart { tool_calls })
    }
}

impl SseProcessor for ChatStreamProcessor {
    fn process(&mut self, _event_name: &str, data: &str) -> ProcessOutcome {
        if data.is_empty() {
            return ProcessOutcome::Continue(Vec::new());
        }

        if data.trim() == "[DONE]" {
            return ProcessOutcome::Done(Vec::new());
        }

        let chunk = match sonic_rs::from_str::<ChatStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) if is_truncation(&e.to_string(), data) => return ProcessOutcome::Truncated,
            Err(e) => {
                log::warn!("skipping unparseable {} frame: {e}", self.provider);
                return ProcessOutcome::Continue(Vec::new());
            }
        };

        if let Some(id) = &chunk.id {
            self.acc.set_id(id);
        }

        if let Some(usage) = chunk.usage {
            let cached = usage.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0);
            self.usage = Some(
                UsageRecord::new(&self.model)
                    .with_tokens(usage.prompt_tokens, usage.completion_tokens)
                    .with_cached(cached),
            );
        }

        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(reasoning) = choice.delta.reasoning_content {
                events.extend(self.acc.thinking_delta(&reasoning, None));
            }

            if let Some(content) = choice.delta.content {
                events.extend(self.acc.text_delta(&content));
            }

            if let Some(fragments) = choice.delta.tool_calls {
                for fragment in fragments {
                    let key = fragment.index.to_string();
                    let (name, arguments) = match fragment.function {
                        Some(function) => (function.name, function.arguments),
                        None => (None, None),
                    };

                    self.tools
                        .begin(&key, fragment.id.unwrap_or_default(), name.unwrap_or_default());

                    if let Some(arguments) = arguments {
                        self.tools.append_arguments(&key, &arguments);
                    }
                }
            }

            if let Some(finish) = choice.finish_reason {
                if finish == "content_filter" {
                    events.push(error_event(&LlmError::ContentBlocked {
                        provider: self.provider.clone(),
                        message: "generation stopped by content filter".to_string(),
                    }));
                }
                self.finish_reason = Some(finish);
            }
        }

        ProcessOutcome::Continue(events)
    }

    fn finish(&mut self, close: StreamClose) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if close == StreamClose::Paused {
            events.extend(self.acc.pause_tail());
        } else {
            if self.sentinel_tools {
                events.extend(self.take_sentinel_calls());
            }
            events.extend(self.tools.finalize());
            events.extend(self.acc.complete());
        }

        if let Some(mut usage) = self.usage.take() {
            if let Some(finish) = &self.finish_reason {
                usage.metadata.insert("finish_reason".to_string(), finish.clone());
            }
            events.push(StreamEvent::CostUpdate { usage });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    fn feed(processor: &mut ChatStreamProcessor, frames: &[&str]) -> Vec<StreamEvent> {
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
    fn deltas_and_usage_normalize() {
        let mut processor = ChatStreamProcessor::new("deepseek", "deepseek-chat", false);

        let mut events = feed(
            &mut processor,
            &[
                r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
                r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
                r#"{"id":"chatcmpl-1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
                r#"{"id":"chatcmpl-1","choices":[],"usage":{"prompt_tokens":11,"completion_tokens":2}}"#,
                "[DONE]",
            ],
        );
        events.extend(processor.finish(StreamClose::Finished));

        assert!(matches!(&events[0], StreamEvent::MessageStart { message_id } if message_id == "chatcmpl-1"));

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::MessageDelta { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");

        let usage = events.iter().find_map(StreamEvent::usage).unwrap();
        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(usage.metadata["finish_reason"], "stop");
    }

    #[test]
    fn indexed_tool_fragments_assemble() {
        let mut processor = ChatStreamProcessor::new("xai", "grok-4", false);

        let mut events = feed(
            &mut processor,
            &[
                r#"{"id":"c1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"lookup","arguments":""}}]}}]}"#,
                r#"{"id":"c1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":\"ru"}}]}}]}"#,
                r#"{"id":"c1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"st\"}"}}]}}]}"#,
                r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
                "[DONE]",
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

        assert_eq!(tool_calls[0].id, "call_9");
        assert_eq!(tool_calls[0].name, "lookup");
        assert_eq!(tool_calls[0].arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn reasoning_content_surfaces_as_thinking() {
        let mut processor = ChatStreamProcessor::new("deepseek", "deepseek-reasoner", false);

        let events = feed(
            &mut processor,
            &[r#"{"id":"c1","choices":[{"index":0,"delta":{"reasoning_content":"step 1..."}}]}"#],
        );

        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::ThinkingDelta { content, .. } if content == "step 1..."))
        );
    }

    #[test]
    fn sentinel_line_parses_into_tool_start_and_leaves_text() {
        let mut processor = ChatStreamProcessor::new("deepseek", "deepseek-reasoner", true);

        let mut events = feed(
            &mut processor,
            &[
                r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"I will look that up.\n"}}]}"#,
                r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"TOOL_CALLS: [{\"name\":\"lookup\",\"arguments\":{\"q\":\"rust\"}}]"}}]}"#,
                "[DONE]",
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
        assert_eq!(tool_calls[0].name, "lookup");
        assert_eq!(tool_calls[0].arguments, r#"{"q":"rust"}"#);

        let complete = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageComplete { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(complete, "I will look that up.");
    }

    #[test]
    fn content_filter_finish_maps_to_content_blocked() {
        let mut processor = ChatStreamProcessor::new("openrouter", "some-model", false);

        let events = feed(
            &mut processor,
            &[r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"content_filter"}]}"#],
        );

        assert!(matches!(&events[0], StreamEvent::Error { code: Some(451), .. }));
    }
}
