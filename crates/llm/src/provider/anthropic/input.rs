//! Canonical → Anthropic Messages API conversion.
//!
//! Conversion rules:
//!
//! - system/developer messages are extracted into the dedicated `system`
//!   field, concatenated in order.
//! - tool results always travel as `tool_result` blocks in user-role turns.
//! - consecutive same-role items coalesce into a single turn, which also
//!   merges an assistant `tool_use` with its follow-up assistant text.
//! - Thinking messages have no outbound representation and are dropped.
//! - when the conversation would end on a non-user turn, a sentinel user
//!   message is appended (the API requires a trailing user turn).

use serde::Serialize;
use serde_json::Value;

use crate::messages::{CONTINUE_SENTINEL, ContentPart, Message, MessageContent, MessageStatus, Role, ToolDefinition};
use crate::registry::ModelRegistry;
use crate::request::ProviderRequest;

const DEFAULT_MAX_TOKENS: u64 = 8_192;

#[derive(Debug, Serialize)]
pub(super) struct AnthropicRequest {
    pub model: String,
    pub max_tokens: u64,
    pub messages: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
pub(super) struct Turn {
    pub role: &'static str,
    pub content: Vec<Block>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum Block {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ImageSource {
    Url { url: String },
    Base64 { media_type: String, data: String },
}

#[derive(Debug, Serialize)]
pub(super) struct WireTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
pub(super) struct ThinkingConfig {
    pub r#type: &'static str,
    pub budget_tokens: u64,
}

impl AnthropicRequest {
    pub(super) fn build(request: &ProviderRequest, registry: &ModelRegistry) -> Self {
        let entry = registry.find(&request.model);

        let max_tokens = request
            .params
            .max_output_tokens
            .or_else(|| entry.and_then(|e| e.features.max_output_tokens))
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let thinking = request.params.thinking_budget_tokens.map(|budget_tokens| ThinkingConfig {
            r#type: "enabled",
            budget_tokens,
        });

        let mut turns: Vec<Turn> = Vec::new();

        for message in &request.messages {
            let Some((role, blocks)) = convert_message(message) else {
                continue;
            };

            // Anthropic requires alternating turns; same-role items merge,
            // which also folds a tool_use into its trailing assistant text.
            match turns.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => turns.push(Turn { role, content: blocks }),
            }
        }

        if turns.last().is_none_or(|turn| turn.role != "user") {
            turns.push(Turn {
                role: "user",
                content: vec![Block::Text {
                    text: CONTINUE_SENTINEL.to_string(),
                }],
            });
        }

        let tools = (!request.tools.is_empty()).then(|| request.tools.iter().map(convert_tool).collect());

        Self {
            model: request.model.clone(),
            max_tokens,
            messages: turns,
            system: crate::messages::collect_system_prompt(&request.messages),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            stream: true,
            tools,
            thinking,
        }
    }
}

fn convert_message(message: &Message) -> Option<(&'static str, Vec<Block>)> {
    match message {
        Message::Conversational { role, content, .. } => {
            if role.is_system() {
                return None;
            }

            let wire_role = match role {
                Role::User => "user",
                _ => "assistant",
            };

            Some((wire_role, convert_content(content)))
        }

        // No outbound representation; the reasoning came from a previous
        // response and is not replayable.
        Message::Thinking { .. } => None,

        Message::ToolCall {
            call_id,
            name,
            arguments,
        } => {
            let input = serde_json::from_str(arguments).unwrap_or_else(|_| Value::Object(Default::default()));
            Some((
                "assistant",
                vec![Block::ToolUse {
                    id: call_id.clone(),
                    name: name.clone(),
                    input,
                }],
            ))
        }

        Message::ToolOutput { call_id, output, status } => Some((
            "user",
            vec![Block::ToolResult {
                tool_use_id: call_id.clone(),
                content: output.to_text(),
                is_error: matches!(status, Some(MessageStatus::Incomplete)),
            }],
        )),
    }
}

fn convert_content(content: &MessageContent) -> Vec<Block> {
    match content {
        MessageContent::Text(text) => vec![Block::Text { text: text.clone() }],
        MessageContent::Parts(parts) => parts.iter().filter_map(convert_part).collect(),
    }
}

fn convert_part(part: &ContentPart) -> Option<Block> {
    match part {
        ContentPart::Text { text } => Some(Block::Text { text: text.clone() }),

        ContentPart::Image { image_url, .. } => Some(Block::Image {
            source: match parse_data_uri(image_url) {
                Some((media_type, data)) => ImageSource::Base64 { media_type, data },
                None => ImageSource::Url {
                    url: image_url.clone(),
                },
            },
        }),

        ContentPart::File { data, filename, .. } => {
            // No generic file slot on this wire; inline the reference as text.
            let label = filename.as_deref().unwrap_or("attachment");
            data.as_ref().map(|_| Block::Text {
                text: format!("[file: {label}]"),
            })
        }
    }
}

fn convert_tool(tool: &ToolDefinition) -> WireTool {
    WireTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.parameters.to_json_schema(),
    }
}

/// Split a `data:<media>;base64,<payload>` URI.
fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, payload) = rest.split_once(";base64,")?;
    Some((media_type.to_string(), payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ToolOutputContent;
    use crate::request::RequestParams;

    fn registry() -> ModelRegistry {
        ModelRegistry::builtin()
    }

    fn build(messages: Vec<Message>) -> AnthropicRequest {
        AnthropicRequest::build(&ProviderRequest::new("claude-sonnet-4-0", messages), &registry())
    }

    #[test]
    fn system_messages_leave_the_turn_list() {
        let request = build(vec![Message::system("Be brief."), Message::user("hi")]);

        assert_eq!(request.system.as_deref(), Some("Be brief."));
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn tool_use_merges_with_following_assistant_text() {
        let request = build(vec![
            Message::user("look it up"),
            Message::ToolCall {
                call_id: "toolu_1".into(),
                name: "lookup".into(),
                arguments: r#"{"q":"rust"}"#.into(),
            },
            Message::assistant("Looking..."),
            Message::ToolOutput {
                call_id: "toolu_1".into(),
                output: ToolOutputContent::Text("found".into()),
                status: None,
            },
        ]);

        // user, merged assistant (tool_use + text), user (tool_result).
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, "assistant");
        assert_eq!(request.messages[1].content.len(), 2);
        assert!(matches!(request.messages[1].content[0], Block::ToolUse { .. }));
        assert!(matches!(request.messages[1].content[1], Block::Text { .. }));

        assert_eq!(request.messages[2].role, "user");
        assert!(matches!(request.messages[2].content[0], Block::ToolResult { .. }));
    }

    #[test]
    fn trailing_assistant_turn_gets_a_sentinel_user_message() {
        let request = build(vec![Message::user("hi"), Message::assistant("hello")]);

        let last = request.messages.last().unwrap();
        assert_eq!(last.role, "user");
        assert!(matches!(&last.content[0], Block::Text { text } if text == CONTINUE_SENTINEL));
    }

    #[test]
    fn thinking_messages_are_dropped_on_the_way_out() {
        let request = build(vec![
            Message::user("hi"),
            Message::Thinking {
                content: "hmm".into(),
                signature: None,
                id: None,
            },
        ]);

        // user turn + sentinel; the thinking message contributed nothing.
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn thinking_budget_enables_extended_thinking() {
        let request = AnthropicRequest::build(
            &ProviderRequest::new("claude-opus-4-1", vec![Message::user("hard problem")]).with_params(RequestParams {
                thinking_budget_tokens: Some(16_000),
                ..RequestParams::default()
            }),
            &registry(),
        );

        assert_eq!(request.thinking.as_ref().unwrap().budget_tokens, 16_000);
        assert_eq!(request.thinking.as_ref().unwrap().r#type, "enabled");
    }

    #[test]
    fn max_tokens_falls_back_to_the_registry_entry() {
        let request = build(vec![Message::user("hi")]);
        // claude-sonnet-4-0 advertises 64k output tokens in the catalog.
        assert_eq!(request.max_tokens, 64_000);
    }
}
