//! Canonical → OpenAI Responses API conversion.
//!
//! The Responses API takes a flat `input` item list: message items with
//! typed content parts, `function_call` items replaying earlier tool calls,
//! and `function_call_output` items carrying their results. System and
//! developer messages travel in the top-level `instructions` field.
//! Thinking messages are dropped on the way out.

use serde::Serialize;
use serde_json::Value;

use crate::messages::{ContentPart, ImageDetail, Message, MessageContent, Role, ToolDefinition, collect_system_prompt};
use crate::registry::ModelRegistry;
use crate::request::ProviderRequest;

#[derive(Debug, Serialize)]
pub(super) struct ResponsesRequest {
    pub model: String,
    pub input: Vec<InputItem>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum InputItem {
    Message {
        role: &'static str,
        content: Vec<Part>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum Part {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String, detail: &'static str },
}

#[derive(Debug, Serialize)]
pub(super) struct WireTool {
    pub r#type: &'static str,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
pub(super) struct TextFormat {
    pub format: FormatType,
}

#[derive(Debug, Serialize)]
pub(super) struct FormatType {
    pub r#type: &'static str,
}

#[derive(Debug, Serialize)]
pub(super) struct ReasoningConfig {
    pub effort: &'static str,
    pub summary: &'static str,
}

impl ResponsesRequest {
    pub(super) fn build(request: &ProviderRequest, registry: &ModelRegistry) -> Self {
        let entry = registry.find(&request.model);

        let input = request.messages.iter().filter_map(convert_message).collect();

        let tools = (!request.tools.is_empty()).then(|| request.tools.iter().map(convert_tool).collect());

        // Reasoning-class models get a summary channel so thinking can be
        // surfaced; the budget knob selects the effort tier.
        let reasoning = request.params.thinking_budget_tokens.map(|budget| ReasoningConfig {
            effort: match budget {
                0..=4_096 => "low",
                4_097..=16_384 => "medium",
                _ => "high",
            },
            summary: "auto",
        });

        Self {
            model: request.model.clone(),
            input,
            stream: true,
            instructions: collect_system_prompt(&request.messages),
            max_output_tokens: request
                .params
                .max_output_tokens
                .or_else(|| entry.and_then(|e| e.features.max_output_tokens)),
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            tools,
            text: request.params.json_output.then_some(TextFormat {
                format: FormatType { r#type: "json_object" },
            }),
            reasoning,
        }
    }
}

fn convert_message(message: &Message) -> Option<InputItem> {
    match message {
        Message::Conversational { role, content, .. } => {
            if role.is_system() {
                return None;
            }

            let (wire_role, assistant) = match role {
                Role::User => ("user", false),
                _ => ("assistant", true),
            };

            Some(InputItem::Message {
                role: wire_role,
                content: convert_content(content, assistant),
            })
        }

        Message::Thinking { .. } => None,

        Message::ToolCall {
            call_id,
            name,
            arguments,
        } => Some(InputItem::FunctionCall {
            call_id: call_id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
        }),

        Message::ToolOutput { call_id, output, .. } => Some(InputItem::FunctionCallOutput {
            call_id: call_id.clone(),
            output: output.to_text(),
        }),
    }
}

fn convert_content(content: &MessageContent, assistant: bool) -> Vec<Part> {
    let text_part = |text: String| {
        if assistant {
            Part::OutputText { text }
        } else {
            Part::InputText { text }
        }
    };

    match content {
        MessageContent::Text(text) => vec![text_part(text.clone())],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text_part(text.clone()),
                ContentPart::Image { image_url, detail } => Part::InputImage {
                    image_url: image_url.clone(),
                    detail: match detail {
                        ImageDetail::Low => "low",
                        ImageDetail::High => "high",
                        ImageDetail::Auto => "auto",
                    },
                },
                ContentPart::File { filename, .. } => {
                    text_part(format!("[file: {}]", filename.as_deref().unwrap_or("attachment")))
                }
            })
            .collect(),
    }
}

fn convert_tool(tool: &ToolDefinition) -> WireTool {
    WireTool {
        r#type: "function",
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.to_json_schema(),
    }
}
