//! The event grammar every provider adapter emits.
//!
//! This is a closed union: adapters translate their wire protocols into
//! exactly these events, in the documented order. Per request:
//!
//! 1. Exactly one [`StreamEvent::StreamEnd`] is the last event, even after
//!    an error.
//! 2. For each `message_id`: `message_start` precedes all
//!    `message_delta`/`thinking_delta`, which precede `message_complete`;
//!    delta `order` values are strictly increasing.
//! 3. A `tool_start` with fully-known arguments may appear at any point
//!    before `stream_end`; the final `tool_start` is authoritative over any
//!    earlier partial emissions.
//! 4. `cost_update` appears after all content events and before
//!    `stream_end`.
//! 5. `error` is not necessarily terminal: adapters still emit
//!    `message_complete` for accumulated partial text, then `stream_end`.

use serde::{Deserialize, Serialize};

use crate::usage::UsageRecord;

/// One fully-assembled tool invocation request surfaced by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallData {
    /// Stable id correlating the call with its eventual output.
    pub id: String,
    /// Tool name; always non-empty in a final `tool_start`.
    pub name: String,
    /// Arguments as JSON text. `"{}"` when the model sent none.
    pub arguments: String,
}

/// Events emitted on the per-request stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A new assistant text message begins.
    MessageStart {
        message_id: String,
    },

    /// Incremental text for a message; `order` strictly increases within
    /// one `message_id`.
    MessageDelta {
        message_id: String,
        content: String,
        order: u64,
    },

    /// Terminal event for a message; `content` is the full accumulated text.
    MessageComplete {
        message_id: String,
        content: String,
    },

    /// Incremental reasoning content, for providers that expose it.
    ThinkingDelta {
        message_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// One or more tool calls assembled; arguments are final JSON text.
    ToolStart {
        tool_calls: Vec<ToolCallData>,
    },

    /// A non-text modality output (e.g. a generated image).
    FileComplete {
        message_id: String,
        mime_type: String,
        /// Always `"base64"`.
        data_format: String,
        data: String,
        order: u64,
    },

    /// Accumulated usage for this request.
    CostUpdate {
        usage: UsageRecord,
    },

    /// A recoverable or terminal error.
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<u16>,
    },

    /// The adapter has produced its last event for this request.
    StreamEnd {},
}

impl StreamEvent {
    /// Convenience constructor for a base64 file output.
    pub fn file(message_id: impl Into<String>, mime_type: impl Into<String>, data: impl Into<String>, order: u64) -> Self {
        Self::FileComplete {
            message_id: message_id.into(),
            mime_type: mime_type.into(),
            data_format: "base64".to_string(),
            data: data.into(),
            order,
        }
    }

    /// Whether this event is the stream terminator.
    pub fn is_end(&self) -> bool {
        matches!(self, Self::StreamEnd {})
    }

    /// The usage carried by this event, if any.
    pub fn usage(&self) -> Option<&UsageRecord> {
        match self {
            Self::CostUpdate { usage } => Some(usage),
            _ => None,
        }
    }
}
