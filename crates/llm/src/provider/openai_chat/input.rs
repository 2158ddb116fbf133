//! Canonical → Chat Completions wire conversion, shared by every
//! OpenAI-compatible backend (DeepSeek, xAI Grok, OpenRouter).
//!
//! Conversion rules:
//!
//! - system/developer messages concatenate into one leading system message.
//! - tool calls become assistant messages with `tool_calls`; tool outputs
//!   become `tool`-role messages keyed by `tool_call_id`.
//! - Thinking messages are dropped (no replayable wire slot).
//! - models without native tool support get the tools described in an extra
//!   system message and answer through the `TOOL_CALLS:` text sentinel
//!   (protocol `magi/tool-calls@1`, parsed in the output module).

use serde::Serialize;
use serde_json::Value;

use crate::messages::{ContentPart, Message, MessageContent, Role, ToolDefinition, collect_system_prompt};
use crate::registry::ModelRegistry;
use crate::request::ProviderRequest;

/// Sentinel line prefix for the text-channel tool protocol.
pub(super) const TOOL_SENTINEL_PREFIX: &str = "TOOL_CALLS:";

#[derive(Debug, Serialize)]
pub(super) struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub(super) struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct WireMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Serialize)]
pub(super) struct WireImageUrl {
    pub url: String,
    pub detail: &'static str,
}

#[derive(Debug, Serialize)]
pub(super) struct WireToolCall {
    pub id: String,
    pub r#type: &'static str,
    pub function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
pub(super) struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub(super) struct WireTool {
    pub r#type: &'static str,
    pub function: WireFunction,
}

#[derive(Debug, Serialize)]
pub(super) struct WireFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
pub(super) struct ResponseFormat {
    pub r#type: &'static str,
}

impl ChatRequest {
    /// Build the wire request; returns whether the sentinel tool protocol
    /// is in effect (so the output side knows to parse it).
    pub(super) fn build(request: &ProviderRequest, registry: &ModelRegistry) -> (Self, bool) {
        let native_tools = registry
            .find(&request.model)
            .map(|entry| entry.features.tool_use)
            .unwrap_or(true);

        let sentinel_tools = !request.tools.is_empty() && !native_tools;

        let mut messages = Vec::new();

        let mut system = collect_system_prompt(&request.messages);
        if sentinel_tools {
            let prompt = sentinel_tool_prompt(&request.tools);
            system = Some(match system {
                Some(existing) => format!("{existing}\n\n{prompt}"),
                None => prompt,
            });
        }

        if let Some(system) = system {
            messages.push(WireMessage {
                role: "system",
                content: Some(WireContent::Text(system)),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for message in &request.messages {
            messages.extend(convert_message(message));
        }

        let tools = (!request.tools.is_empty() && native_tools)
            .then(|| request.tools.iter().map(convert_tool).collect());

        let wire = Self {
            model: request.model.clone(),
            messages,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_output_tokens,
            tools,
            response_format: request.params.json_output.then_some(ResponseFormat { r#type: "json_object" }),
        };

        (wire, sentinel_tools)
    }
}

fn convert_message(message: &Message) -> Option<WireMessage> {
    match message {
        Message::Conversational { role, content, .. } => {
            if role.is_system() {
                // Already folded into the leading system message.
                return None;
            }

            let wire_role = match role {
                Role::User => "user",
                _ => "assistant",
            };

            Some(WireMessage {
                role: wire_role,
                content: Some(convert_content(content)),
                tool_calls: None,
                tool_call_id: None,
            })
        }

        Message::Thinking { .. } => None,

        Message::ToolCall {
            call_id,
            name,
            arguments,
        } => Some(WireMessage {
            role: "assistant",
            content: None,
            tool_calls: Some(vec![WireToolCall {
                id: call_id.clone(),
                r#type: "function",
                function: WireFunctionCall {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }]),
            tool_call_id: None,
        }),

        Message::ToolOutput { call_id, output, .. } => Some(WireMessage {
            role: "tool",
            content: Some(WireContent::Text(output.to_text())),
            tool_calls: None,
            tool_call_id: Some(call_id.clone()),
        }),
    }
}

fn convert_content(content: &MessageContent) -> WireContent {
    match content {
        MessageContent::Text(text) => WireContent::Text(text.clone()),
        MessageContent::Parts(parts) => WireContent::Parts(
            parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(WirePart::Text { text: text.clone() }),
                    ContentPart::Image { image_url, detail } => Some(WirePart::ImageUrl {
                        image_url: WireImageUrl {
                            url: image_url.clone(),
                            detail: match detail {
                                crate::messages::ImageDetail::Low => "low",
                                crate::messages::ImageDetail::High => "high",
                                crate::messages::ImageDetail::Auto => "auto",
                            },
                        },
                    }),
                    // No file slot on this wire.
                    ContentPart::File { filename, .. } => Some(WirePart::Text {
                        text: format!("[file: {}]", filename.as_deref().unwrap_or("attachment")),
                    }),
                })
                .collect(),
        ),
    }
}

fn convert_tool(tool: &ToolDefinition) -> WireTool {
    WireTool {
        r#type: "function",
        function: WireFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.to_json_schema(),
        },
    }
}

/// System-prompt description of tools for models without native tool use.
fn sentinel_tool_prompt(tools: &[ToolDefinition]) -> String {
    use std::fmt::Write;

    let mut prompt = String::from(
        "You cannot call tools natively. These tools are available to you:\n",
    );

    for tool in tools {
        let _ = writeln!(
            prompt,
            "- {}: {} (parameters: {})",
            tool.name,
            tool.description,
            tool.parameters.to_json_schema()
        );
    }

    prompt.push_str(
        "To invoke one or more tools, end your reply with a single line of the form:\n\
         TOOL_CALLS: [{\"name\": \"tool_name\", \"arguments\": {}}]\n\
         The line must be valid JSON after the prefix. (protocol magi/tool-calls@1)",
    );

    prompt
}
