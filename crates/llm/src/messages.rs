//! Canonical message and tool types shared by every adapter.
//!
//! These are the wire-format-independent inputs to a request. Adapters
//! convert them to their backend's shape on the way out and never mutate
//! them; see each adapter's `input` module for the conversion rules.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sender role of a conversational message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// Developer instructions; providers without a distinct slot treat this
    /// as system.
    Developer,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

impl Role {
    /// Whether this role lands in the provider's system-prompt slot.
    pub fn is_system(self) -> bool {
        matches!(self, Role::System | Role::Developer)
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    InProgress,
    Completed,
    Incomplete,
}

/// Detail level requested for an image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    Auto,
}

/// One element of a multi-part message body, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// An image reference: a URL or a `data:` URI.
    Image {
        image_url: String,
        detail: ImageDetail,
    },
    /// A file reference, either by provider file id or inline base64 data.
    File {
        #[serde(skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
}

/// Message body: a bare string or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// All text carried by this content, parts flattened in order.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Output of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutputContent {
    Text(String),
    Structured(Value),
}

impl ToolOutputContent {
    /// Render as text for wire formats that only accept strings.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

/// A canonical input message.
///
/// Invariant: every `ToolOutput` refers to a prior `ToolCall` with the same
/// `call_id` within the same conversation ([`pair_tool_messages`] checks
/// this for bounded lookahead).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A user/assistant/system turn.
    #[serde(rename = "message")]
    Conversational {
        role: Role,
        content: MessageContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<MessageStatus>,
    },

    /// Provider-exposed reasoning attributed to the assistant.
    Thinking {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// The assistant's request to invoke a named tool.
    ToolCall {
        call_id: String,
        name: String,
        /// Arguments as JSON text.
        arguments: String,
    },

    /// The result for a previous [`Message::ToolCall`].
    ToolOutput {
        call_id: String,
        output: ToolOutputContent,
        /// `Some(Incomplete)` signals the tool errored.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<MessageStatus>,
    },
}

impl Message {
    /// A plain user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::Conversational {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            status: None,
        }
    }

    /// A plain assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Conversational {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            status: None,
        }
    }

    /// A system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::Conversational {
            role: Role::System,
            content: MessageContent::Text(text.into()),
            status: None,
        }
    }

    /// The role this message speaks as, for adapters that need a single
    /// role per wire entry.
    pub fn effective_role(&self) -> Role {
        match self {
            Self::Conversational { role, .. } => *role,
            Self::Thinking { .. } | Self::ToolCall { .. } => Role::Assistant,
            // Most wire formats route tool results through the user slot.
            Self::ToolOutput { .. } => Role::User,
        }
    }

    /// Text rendering used for token estimation and summarization.
    pub fn render_text(&self) -> String {
        match self {
            Self::Conversational { content, .. } => content.text(),
            Self::Thinking { content, .. } => content.clone(),
            Self::ToolCall { name, arguments, .. } => format!("{name}({arguments})"),
            Self::ToolOutput { output, .. } => output.to_text(),
        }
    }
}

/// Text injected when a wire format requires the conversation to end on a
/// user turn but the history does not.
pub const CONTINUE_SENTINEL: &str = "Continue.";

/// Concatenate all system/developer messages into a single system prompt,
/// preserving order, with blank-line separators.
pub fn collect_system_prompt(messages: &[Message]) -> Option<String> {
    let parts: Vec<String> = messages
        .iter()
        .filter_map(|message| match message {
            Message::Conversational { role, content, .. } if role.is_system() => Some(content.text()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect();

    if parts.is_empty() { None } else { Some(parts.join("\n\n")) }
}

/// Index pairs of (ToolCall, ToolOutput) with matching `call_id`, searching
/// at most `lookahead` messages past each call.
pub fn pair_tool_messages(messages: &[Message], lookahead: usize) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();

    for (index, message) in messages.iter().enumerate() {
        let Message::ToolCall { call_id, .. } = message else {
            continue;
        };

        let window_end = (index + 1 + lookahead).min(messages.len());
        let matched = messages[index + 1..window_end]
            .iter()
            .position(|candidate| matches!(candidate, Message::ToolOutput { call_id: out, .. } if out == call_id));

        if let Some(offset) = matched {
            pairs.push((index, index + 1 + offset));
        }
    }

    pairs
}

/// JSON-Schema primitive types a tool parameter may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
}

/// Schema of a single tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    /// Element schema, for `array` parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,
}

impl ParameterSchema {
    /// A schema of the given primitive type with no constraints.
    pub fn of(param_type: ParamType) -> Self {
        Self {
            param_type,
            description: None,
            enum_values: None,
            items: None,
        }
    }

    /// Attach a human description.
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Object schema for a tool's parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    /// Named properties, in declaration order.
    pub properties: IndexMap<String, ParameterSchema>,
    /// Names of required properties.
    pub required: Vec<String>,
}

impl ToolParameters {
    /// Render as a standard JSON-Schema object value.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();

        for (name, schema) in &self.properties {
            properties.insert(
                name.clone(),
                serde_json::to_value(schema).unwrap_or(Value::Null),
            );
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique name.
    pub name: String,
    /// Human description guiding when the model should call it.
    pub description: String,
    /// Parameter schema.
    pub parameters: ToolParameters,
}

impl ToolDefinition {
    /// A tool taking no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters::default(),
        }
    }

    /// Add a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, schema: ParameterSchema, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required_mut().push(name.clone());
        }
        self.parameters.properties.insert(name, schema);
        self
    }

    fn required_mut(&mut self) -> &mut Vec<String> {
        &mut self.parameters.required
    }
}
