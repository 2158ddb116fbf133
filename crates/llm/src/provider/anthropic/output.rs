//! Anthropic SSE → event grammar.
//!
//! The Messages API streams typed events around indexed content blocks:
//!
//! 1. `message_start` — id and prompt-side usage
//! 2. `content_block_start` / `content_block_delta` / `content_block_stop`
//!    per block (text, thinking or tool_use)
//! 3. `message_delta` — stop reason and completion-side usage
//! 4. `message_stop`
//!
//! Thinking blocks surface as `thinking_delta` only; they never join the
//! accumulated message text. Tool arguments accumulate per block index and
//! the single authoritative `tool_start` goes out at close.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::LlmError;
use crate::events::StreamEvent;
use crate::provider::error_event;
use crate::provider::stream::{
    MessageAccumulator, ProcessOutcome, SseProcessor, StreamClose, ToolCallAssembler, is_truncation,
};
use crate::usage::UsageRecord;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum AnthropicWireEvent {
    MessageStart { message: WireMessageStart },
    ContentBlockStart { index: u32, content_block: WireContentBlock },
    ContentBlockDelta { index: u32, delta: WireBlockDelta },
    ContentBlockStop { index: u32 },
    MessageDelta { delta: WireMessageDelta, usage: Option<WireUsage> },
    MessageStop,
    Ping,
    Error { error: WireError },
}

#[derive(Debug, Deserialize)]
pub(super) struct WireMessageStart {
    pub id: String,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum WireContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    RedactedThinking {},
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum WireBlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
}

#[derive(Debug, Deserialize)]
pub(super) struct WireMessageDelta {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub(super) struct WireUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

#[derive(Clone, Copy, PartialEq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

pub(super) struct AnthropicStreamProcessor {
    model: String,
    acc: MessageAccumulator,
    tools: ToolCallAssembler,
    blocks: HashMap<u32, BlockKind>,
    input_tokens: u64,
    output_tokens: u64,
    cached_tokens: u64,
    saw_usage: bool,
    stop_reason: Option<String>,
}

impl AnthropicStreamProcessor {
    pub(super) fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            acc: MessageAccumulator::new(),
            tools: ToolCallAssembler::new(),
            blocks: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
            saw_usage: false,
            stop_reason: None,
        }
    }

    fn absorb_usage(&mut self, usage: WireUsage) {
        self.saw_usage = true;
        if let Some(input) = usage.input_tokens {
            self.input_tokens = input;
        }
        if let Some(output) = usage.output_tokens {
            self.output_tokens = output;
        }
        if let Some(cached) = usage.cache_read_input_tokens {
            self.cached_tokens = cached;
        }
    }

    fn usage_record(&self) -> Option<UsageRecord> {
        self.saw_usage.then(|| {
            let mut usage = UsageRecord::new(&self.model)
                .with_tokens(self.input_tokens, self.output_tokens)
                .with_cached(self.cached_tokens);
            if let Some(stop) = &self.stop_reason {
                usage.metadata.insert("stop_reason".to_string(), stop.clone());
            }
            usage
        })
    }
}

impl SseProcessor for AnthropicStreamProcessor {
    fn process(&mut self, _event_name: &str, data: &str) -> ProcessOutcome {
        if data.is_empty() {
            return ProcessOutcome::Continue(Vec::new());
        }

        let event = match sonic_rs::from_str::<AnthropicWireEvent>(data) {
            Ok(event) => event,
            Err(e) if is_truncation(&e.to_string(), data) => return ProcessOutcome::Truncated,
            Err(e) => {
                log::warn!("skipping unparseable Anthropic frame: {e}");
                return ProcessOutcome::Continue(Vec::new());
            }
        };

        let events = match event {
            AnthropicWireEvent::MessageStart { message } => {
                self.acc.set_id(&message.id);
                if let Some(usage) = message.usage {
                    self.absorb_usage(usage);
                }
                Vec::new()
            }

            AnthropicWireEvent::ContentBlockStart { index, content_block } => match content_block {
                WireContentBlock::Text { text } => {
                    self.blocks.insert(index, BlockKind::Text);
                    self.acc.text_delta(&text)
                }
                WireContentBlock::ToolUse { id, name } => {
                    self.blocks.insert(index, BlockKind::ToolUse);
                    self.tools.begin(index.to_string(), id, name);
                    Vec::new()
                }
                WireContentBlock::Thinking { thinking } => {
                    self.blocks.insert(index, BlockKind::Thinking);
                    self.acc.thinking_delta(&thinking, None)
                }
                WireContentBlock::RedactedThinking {} => {
                    self.blocks.insert(index, BlockKind::Thinking);
                    Vec::new()
                }
            },

            AnthropicWireEvent::ContentBlockDelta { index, delta } => match delta {
                WireBlockDelta::TextDelta { text } => self.acc.text_delta(&text),
                WireBlockDelta::ThinkingDelta { thinking } => self.acc.thinking_delta(&thinking, None),
                WireBlockDelta::SignatureDelta { signature } => self.acc.thinking_delta("", Some(signature)),
                WireBlockDelta::InputJsonDelta { partial_json } => {
                    if self.blocks.get(&index) == Some(&BlockKind::ToolUse) {
                        self.tools.append_arguments(&index.to_string(), &partial_json);
                    }
                    Vec::new()
                }
            },

            AnthropicWireEvent::ContentBlockStop { .. } | AnthropicWireEvent::Ping => Vec::new(),

            AnthropicWireEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.absorb_usage(usage);
                }

                let mut events = Vec::new();
                if let Some(stop) = delta.stop_reason {
                    if stop == "refusal" {
                        events.push(error_event(&LlmError::ContentBlocked {
                            provider: "anthropic".to_string(),
                            message: "generation stopped with a refusal".to_string(),
                        }));
                    }
                    self.stop_reason = Some(stop);
                }
                events
            }

            AnthropicWireEvent::MessageStop => return ProcessOutcome::Done(Vec::new()),

            AnthropicWireEvent::Error { error } => {
                log::error!("Anthropic stream error: {} - {}", error.error_type, error.message);

                let mapped = match error.error_type.as_str() {
                    "rate_limit_error" | "overloaded_error" => LlmError::RateLimited {
                        provider: "anthropic".to_string(),
                        message: error.message,
                    },
                    _ => LlmError::ProtocolFailure(format!("{}: {}", error.error_type, error.message)),
                };
                vec![error_event(&mapped)]
            }
        };

        ProcessOutcome::Continue(events)
    }

    fn finish(&mut self, close: StreamClose) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if close == StreamClose::Paused {
            events.extend(self.acc.pause_tail());
        } else {
            // Final, authoritative tool calls; partially-assembled argument
            // JSON fails validation inside the assembler and is dropped.
            events.extend(self.tools.finalize());
            events.extend(self.acc.complete());
        }

        if let Some(usage) = self.usage_record() {
            events.push(StreamEvent::CostUpdate { usage });
        }

        events
    }
}
