//! The shared streaming state machine.
//!
//! [`drive_sse`] owns the per-request lifecycle every HTTP adapter goes
//! through: Requesting → Streaming → (Assembling ToolCall)* → Ended /
//! Failed / Paused → Terminal. Adapters plug in an [`SseProcessor`] that
//! turns wire frames into grammar events; the driver contributes the
//! control-flow tail:
//!
//! - cancellation and deadline races at every suspension point,
//! - the process-wide pause flag, checked before each backend read,
//! - bounded retry (exponential backoff with jitter) for frames whose JSON
//!   was truncated mid-frame,
//! - the failure contract: `error` → `message_complete` with accumulated
//!   partial text → exactly one `stream_end`.

use std::collections::VecDeque;
use std::pin::Pin;

use eventsource_stream::{Event as SseFrame, EventStreamError};
use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::events::{StreamEvent, ToolCallData};
use crate::provider::{EventStream, error_event};
use crate::request::{PauseSignal, RequestContext};

/// Why the driver is closing the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamClose {
    /// The backend finished normally.
    Finished,
    /// Transport or protocol failure mid-stream.
    Failed,
    /// Cooperative cancellation.
    Cancelled,
    /// Per-request deadline expired.
    TimedOut,
    /// The process-wide pause flag was observed.
    Paused,
}

/// Result of feeding one frame to a processor.
pub(crate) enum ProcessOutcome {
    /// Keep streaming.
    Continue(Vec<StreamEvent>),
    /// Terminal frame consumed; the driver will call `finish` and end.
    Done(Vec<StreamEvent>),
    /// The frame's JSON ended mid-document; retry with the next frame's
    /// data appended.
    Truncated,
}

/// Wire-frame parser for one backend.
pub(crate) trait SseProcessor: Send + 'static {
    /// Consume one frame. `event_name` is the SSE `event:` field (empty for
    /// backends that only use `data:`).
    fn process(&mut self, event_name: &str, data: &str) -> ProcessOutcome;

    /// Flush terminal events for the close reason: `message_complete` for
    /// any accumulated partial text, assembled tool calls, and usage when
    /// known. The driver appends the final `stream_end` itself.
    fn finish(&mut self, close: StreamClose) -> Vec<StreamEvent>;
}

const MAX_TRUNCATION_RETRIES: u32 = 3;

struct Driver<S, P> {
    frames: Pin<Box<S>>,
    processor: P,
    queue: VecDeque<StreamEvent>,
    /// Accumulated (event_name, data) of a truncated frame awaiting more
    /// bytes.
    pending: Option<(String, String)>,
    truncation_retries: u32,
    open: bool,
    cancel: CancellationToken,
    pause: PauseSignal,
    deadline: Option<tokio::time::Instant>,
}

impl<S, P> Driver<S, P>
where
    P: SseProcessor,
{
    fn close(&mut self, close: StreamClose) {
        self.queue.extend(self.processor.finish(close));
        self.queue.push_back(StreamEvent::StreamEnd {});
        self.open = false;
    }
}

/// Run an SSE frame stream through a processor, yielding grammar events.
pub(crate) fn drive_sse<S, P>(frames: S, processor: P, context: &RequestContext) -> EventStream
where
    S: Stream<Item = std::result::Result<SseFrame, EventStreamError<reqwest::Error>>> + Send + 'static,
    P: SseProcessor,
{
    let driver = Driver {
        frames: Box::pin(frames),
        processor,
        queue: VecDeque::new(),
        pending: None,
        truncation_retries: 0,
        open: true,
        cancel: context.cancel.clone(),
        pause: context.pause.clone(),
        deadline: context.deadline,
    };

    Box::pin(futures::stream::unfold(driver, |mut driver| async move {
        loop {
            if let Some(event) = driver.queue.pop_front() {
                return Some((event, driver));
            }

            if !driver.open {
                return None;
            }

            if driver.pause.is_paused() {
                driver.close(StreamClose::Paused);
                continue;
            }

            let deadline = driver.deadline;
            let cancel = driver.cancel.clone();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    driver.queue.push_back(error_event(&LlmError::Cancelled));
                    driver.close(StreamClose::Cancelled);
                }

                _ = expire(deadline) => {
                    driver.queue.push_back(error_event(&LlmError::Timeout));
                    driver.close(StreamClose::TimedOut);
                }

                frame = driver.frames.next() => match frame {
                    None => driver.close(StreamClose::Finished),

                    Some(Err(e)) => {
                        log::warn!("transport failure mid-stream: {e}");
                        driver
                            .queue
                            .push_back(error_event(&LlmError::TransportFailure(e.to_string())));
                        driver.close(StreamClose::Failed);
                    }

                    Some(Ok(frame)) => {
                        let (event_name, data) = match driver.pending.take() {
                            Some((name, mut buffered)) => {
                                buffered.push_str(&frame.data);
                                (name, buffered)
                            }
                            None => (frame.event, frame.data),
                        };

                        match driver.processor.process(&event_name, &data) {
                            ProcessOutcome::Continue(events) => {
                                driver.truncation_retries = 0;
                                driver.queue.extend(events);
                            }
                            ProcessOutcome::Done(events) => {
                                driver.queue.extend(events);
                                driver.close(StreamClose::Finished);
                            }
                            ProcessOutcome::Truncated => {
                                driver.truncation_retries += 1;

                                if driver.truncation_retries > MAX_TRUNCATION_RETRIES {
                                    log::warn!("giving up on truncated frame after {MAX_TRUNCATION_RETRIES} retries");
                                    driver.queue.push_back(error_event(&LlmError::ProtocolFailure(
                                        "stream frame remained unparseable after retries".to_string(),
                                    )));
                                    driver.close(StreamClose::Failed);
                                } else {
                                    driver.pending = Some((event_name, data));
                                    tokio::time::sleep(backoff(driver.truncation_retries)).await;
                                }
                            }
                        }
                    }
                },
            }
        }
    }))
}

async fn expire(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Exponential backoff with jitter for truncated-frame retries.
fn backoff(attempt: u32) -> std::time::Duration {
    let base = 100u64 << (attempt - 1).min(4);
    let jitter = rand::rng().random_range(0..50);
    std::time::Duration::from_millis(base + jitter)
}

/// Heuristic: does this parse failure look like a frame cut off mid-JSON
/// (as opposed to genuinely malformed data)? Checks the parser's wording
/// and, independently, whether the document is structurally unterminated.
pub(crate) fn is_truncation(parse_error: &str, data: &str) -> bool {
    let lower = parse_error.to_ascii_lowercase();
    if lower.contains("eof") || lower.contains("unexpected end") {
        return true;
    }

    json_unterminated(data)
}

/// Structural check: unbalanced braces/brackets or an unclosed string at
/// end of input.
fn json_unterminated(data: &str) -> bool {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in data.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            _ => {}
        }
    }

    in_string || depth > 0
}

/// Tracks one assistant message through the grammar: `message_start` before
/// the first delta, strictly increasing `order`, one `message_complete`
/// carrying the accumulated text.
pub(crate) struct MessageAccumulator {
    message_id: String,
    started: bool,
    completed: bool,
    next_order: u64,
    text: String,
}

impl Default for MessageAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageAccumulator {
    pub(crate) fn new() -> Self {
        Self::with_id(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }

    pub(crate) fn with_id(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            started: false,
            completed: false,
            next_order: 0,
            text: String::new(),
        }
    }

    /// Adopt the backend's message id. Only honored before the first event.
    pub(crate) fn set_id(&mut self, message_id: &str) {
        if !self.started {
            self.message_id = message_id.to_string();
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.started {
            self.started = true;
            out.push(StreamEvent::MessageStart {
                message_id: self.message_id.clone(),
            });
        }
    }

    /// Emit a text delta (preceded by `message_start` when first).
    pub(crate) fn text_delta(&mut self, content: &str) -> Vec<StreamEvent> {
        if content.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(2);
        self.ensure_started(&mut out);
        self.text.push_str(content);

        out.push(StreamEvent::MessageDelta {
            message_id: self.message_id.clone(),
            content: content.to_string(),
            order: self.bump_order(),
        });
        out
    }

    /// Emit a thinking delta. Reasoning text never enters the accumulated
    /// message content. A bare signature (empty content) is still emitted;
    /// providers deliver it as its own trailing delta.
    pub(crate) fn thinking_delta(&mut self, content: &str, signature: Option<String>) -> Vec<StreamEvent> {
        if content.is_empty() && signature.is_none() {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(2);
        self.ensure_started(&mut out);

        out.push(StreamEvent::ThinkingDelta {
            message_id: self.message_id.clone(),
            content: content.to_string(),
            signature,
        });
        out
    }

    /// Emit a non-text output.
    pub(crate) fn file(&mut self, mime_type: &str, data: &str) -> Vec<StreamEvent> {
        let mut out = Vec::with_capacity(2);
        self.ensure_started(&mut out);
        let order = self.bump_order();
        out.push(StreamEvent::file(self.message_id.clone(), mime_type, data, order));
        out
    }

    /// The terminal `message_complete`, emitted at most once and only for
    /// messages that started.
    pub(crate) fn complete(&mut self) -> Option<StreamEvent> {
        if !self.started || self.completed {
            return None;
        }

        self.completed = true;
        Some(StreamEvent::MessageComplete {
            message_id: self.message_id.clone(),
            content: self.text.clone(),
        })
    }

    /// The pause tail: a terminal delta marking the pause, then the
    /// completion of whatever was accumulated.
    pub(crate) fn pause_tail(&mut self) -> Vec<StreamEvent> {
        let mut out = self.text_delta("\n[paused]");
        out.extend(self.complete());
        out
    }

    fn bump_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    /// Remove a trailing line beginning with `prefix` from the accumulated
    /// text and return the rest of that line. Used by adapters whose tool
    /// protocol rides inside the text channel.
    pub(crate) fn take_trailing_line(&mut self, prefix: &str) -> Option<String> {
        let trimmed = self.text.trim_end();
        let line_start = trimmed.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line = &trimmed[line_start..];

        let payload = line.strip_prefix(prefix)?.trim().to_string();
        self.text.truncate(line_start);
        while self.text.ends_with('\n') || self.text.ends_with(' ') {
            self.text.pop();
        }
        Some(payload)
    }
}

/// Assembles streamed tool-call fragments into final calls, keyed by the
/// backend's (index, id) discriminator.
#[derive(Default)]
pub(crate) struct ToolCallAssembler {
    calls: IndexMap<String, PartialCall>,
}

struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start (or re-key) a call. Later fragments reference `key`.
    pub(crate) fn begin(&mut self, key: impl Into<String>, id: impl Into<String>, name: impl Into<String>) {
        let entry = self.calls.entry(key.into()).or_insert_with(|| PartialCall {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });

        let id = id.into();
        let name = name.into();
        if !id.is_empty() {
            entry.id = id;
        }
        if !name.is_empty() {
            entry.name = name;
        }
    }

    /// Append a streamed argument fragment.
    pub(crate) fn append_arguments(&mut self, key: &str, fragment: &str) {
        if let Some(call) = self.calls.get_mut(key) {
            call.arguments.push_str(fragment);
        }
    }

    /// Record fully-known arguments in one shot.
    pub(crate) fn set_arguments(&mut self, key: &str, arguments: String) {
        if let Some(call) = self.calls.get_mut(key) {
            call.arguments = arguments;
        }
    }

    /// The authoritative `tool_start`, or `None` when no calls assembled.
    ///
    /// Calls with unparseable argument JSON are dropped with a warning so
    /// the grammar's valid-JSON guarantee holds; empty arguments become
    /// `{}`.
    pub(crate) fn finalize(&mut self) -> Option<StreamEvent> {
        let calls: Vec<ToolCallData> = self
            .calls
            .drain(..)
            .filter_map(|(_, call)| {
                let arguments = if call.arguments.trim().is_empty() || call.arguments.trim() == "null" {
                    "{}".to_string()
                } else {
                    call.arguments
                };

                if call.name.is_empty() {
                    log::warn!("dropping tool call '{}' with no name", call.id);
                    return None;
                }

                if serde_json::from_str::<serde_json::Value>(&arguments).is_err() {
                    log::warn!("dropping tool call '{}' with unparseable arguments", call.name);
                    return None;
                }

                let id = if call.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    call.id
                };

                Some(ToolCallData {
                    id,
                    name: call.name,
                    arguments,
                })
            })
            .collect();

        (!calls.is_empty()).then_some(StreamEvent::ToolStart { tool_calls: calls })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn accumulator_orders_deltas_and_completes_once() {
        let mut acc = MessageAccumulator::with_id("msg_test");

        let first = acc.text_delta("Hello");
        assert_eq!(first.len(), 2);
        assert!(matches!(&first[0], StreamEvent::MessageStart { message_id } if message_id == "msg_test"));
        assert!(matches!(&first[1], StreamEvent::MessageDelta { order: 0, .. }));

        let second = acc.text_delta(" world");
        assert_eq!(second.len(), 1);
        assert!(matches!(&second[0], StreamEvent::MessageDelta { order: 1, .. }));

        let complete = acc.complete().unwrap();
        assert!(matches!(&complete, StreamEvent::MessageComplete { content, .. } if content == "Hello world"));
        assert!(acc.complete().is_none());
    }

    #[test]
    fn empty_deltas_emit_nothing() {
        let mut acc = MessageAccumulator::new();
        assert!(acc.text_delta("").is_empty());
        assert!(acc.complete().is_none());
    }

    #[test]
    fn thinking_does_not_join_message_text() {
        let mut acc = MessageAccumulator::with_id("m");
        acc.thinking_delta("pondering", None);
        acc.text_delta("answer");

        let complete = acc.complete().unwrap();
        assert!(matches!(&complete, StreamEvent::MessageComplete { content, .. } if content == "answer"));
    }

    #[test]
    fn assembler_accumulates_fragments_per_key() {
        let mut assembler = ToolCallAssembler::new();
        assembler.begin("0", "call_a", "lookup");
        assembler.append_arguments("0", "{\"query\":");
        assembler.append_arguments("0", "\"rust\"}");

        let StreamEvent::ToolStart { tool_calls } = assembler.finalize().unwrap() else {
            panic!("expected tool_start");
        };

        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "lookup");
        assert_eq!(tool_calls[0].arguments, "{\"query\":\"rust\"}");
    }

    #[test]
    fn assembler_defaults_empty_and_null_arguments_to_object() {
        let mut assembler = ToolCallAssembler::new();
        assembler.begin("0", "call_a", "noop");
        assembler.set_arguments("0", "null".to_string());

        let StreamEvent::ToolStart { tool_calls } = assembler.finalize().unwrap() else {
            panic!("expected tool_start");
        };
        assert_eq!(tool_calls[0].arguments, "{}");
    }

    #[test]
    fn assembler_drops_unparseable_arguments() {
        let mut assembler = ToolCallAssembler::new();
        assembler.begin("0", "call_a", "broken");
        assembler.set_arguments("0", "{\"oops\":".to_string());

        assert!(assembler.finalize().is_none());
    }

    #[test]
    fn truncation_heuristic_matches_parser_wording() {
        assert!(is_truncation("EOF while parsing a value at line 1", "{}"));
        assert!(is_truncation("unexpected end of input", "{}"));
        assert!(!is_truncation("invalid type: map, expected string", "{\"a\":1}"));
    }

    #[test]
    fn truncation_heuristic_detects_unterminated_documents() {
        assert!(is_truncation("some parser error", r#"{"type":"message_start","message":{"id":"ms"#));
        assert!(is_truncation("some parser error", r#"{"text":"unclosed string"#));
        assert!(!is_truncation("some parser error", r#"{"complete":true}"#));
    }
}
