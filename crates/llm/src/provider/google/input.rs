//! Canonical → Gemini `generateContent` conversion.
//!
//! Gemini speaks camelCase content parts under two roles (`user`/`model`).
//! System and developer messages go to `systemInstruction`; tool outputs
//! become `functionResponse` parts keyed by function *name* (resolved from
//! the matching prior tool call, since the wire has no call ids). Thinking
//! messages are dropped.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::messages::{ContentPart, Message, MessageContent, Role, ToolDefinition, collect_system_prompt};
use crate::request::ProviderRequest;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GoogleRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclarations>>,
}

#[derive(Debug, Serialize)]
pub(super) struct Content {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(super) enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub(super) struct FunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Serialize)]
pub(super) struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Serialize)]
pub(super) struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ToolDeclarations {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub(super) struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl GoogleRequest {
    pub(super) fn build(request: &ProviderRequest) -> Self {
        // The wire keys function responses by name; recover it from the
        // matching tool call.
        let call_names: HashMap<&str, &str> = request
            .messages
            .iter()
            .filter_map(|message| match message {
                Message::ToolCall { call_id, name, .. } => Some((call_id.as_str(), name.as_str())),
                _ => None,
            })
            .collect();

        let mut contents: Vec<Content> = Vec::new();

        for message in &request.messages {
            let Some((role, parts)) = convert_message(message, &call_names) else {
                continue;
            };

            // Gemini tolerates repeated roles but merging keeps turns tidy
            // and folds tool calls into their surrounding model turn.
            match contents.last_mut() {
                Some(last) if last.role == role => last.parts.extend(parts),
                _ => contents.push(Content { role, parts }),
            }
        }

        let generation_config = Some(GenerationConfig {
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_output_tokens: request.params.max_output_tokens,
            response_mime_type: request.params.json_output.then_some("application/json"),
        });

        let tools = (!request.tools.is_empty()).then(|| {
            vec![ToolDeclarations {
                function_declarations: request.tools.iter().map(convert_tool).collect(),
            }]
        });

        Self {
            contents,
            system_instruction: collect_system_prompt(&request.messages).map(|text| SystemInstruction {
                parts: vec![Part::Text { text }],
            }),
            generation_config,
            tools,
        }
    }
}

fn convert_message(message: &Message, call_names: &HashMap<&str, &str>) -> Option<(&'static str, Vec<Part>)> {
    match message {
        Message::Conversational { role, content, .. } => {
            if role.is_system() {
                return None;
            }

            let wire_role = match role {
                Role::User => "user",
                _ => "model",
            };

            Some((wire_role, convert_content(content)))
        }

        Message::Thinking { .. } => None,

        Message::ToolCall { name, arguments, .. } => {
            let args = serde_json::from_str(arguments).unwrap_or_else(|_| Value::Object(Default::default()));
            Some((
                "model",
                vec![Part::FunctionCall {
                    function_call: FunctionCall {
                        name: name.clone(),
                        args,
                    },
                }],
            ))
        }

        Message::ToolOutput { call_id, output, .. } => {
            let name = call_names.get(call_id.as_str()).copied().unwrap_or("unknown");
            Some((
                "user",
                vec![Part::FunctionResponse {
                    function_response: FunctionResponse {
                        name: name.to_string(),
                        response: serde_json::json!({ "result": output.to_text() }),
                    },
                }],
            ))
        }
    }
}

fn convert_content(content: &MessageContent) -> Vec<Part> {
    match content {
        MessageContent::Text(text) => vec![Part::Text { text: text.clone() }],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(Part::Text { text: text.clone() }),
                ContentPart::Image { image_url, .. } => match parse_data_uri(image_url) {
                    Some((mime_type, data)) => Some(Part::InlineData {
                        inline_data: InlineData { mime_type, data },
                    }),
                    // Gemini only takes inline bytes or file-service
                    // handles; plain URLs degrade to a text mention.
                    None => Some(Part::Text {
                        text: format!("[image: {image_url}]"),
                    }),
                },
                ContentPart::File { data, filename, .. } => data.as_ref().map(|data| Part::InlineData {
                    inline_data: InlineData {
                        mime_type: guess_mime(filename.as_deref()),
                        data: data.clone(),
                    },
                }),
            })
            .collect(),
    }
}

fn convert_tool(tool: &ToolDefinition) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.to_json_schema(),
    }
}

fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, payload) = rest.split_once(";base64,")?;
    Some((media_type.to_string(), payload.to_string()))
}

fn guess_mime(filename: Option<&str>) -> String {
    match filename.and_then(|f| f.rsplit_once('.')).map(|(_, ext)| ext) {
        Some("pdf") => "application/pdf".to_string(),
        Some("png") => "image/png".to_string(),
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;
    use crate::messages::ToolOutputContent;

    #[test]
    fn assistant_role_maps_to_model() {
        let request = ProviderRequest::new(
            "gemini-2.5-pro",
            vec![Message::user("hi"), Message::assistant("hello")],
        );

        let wire = GoogleRequest::build(&request);
        assert_eq!(wire.contents[0].role, "user");
        assert_eq!(wire.contents[1].role, "model");
    }

    #[test]
    fn tool_output_resolves_function_name_from_prior_call() {
        let request = ProviderRequest::new(
            "gemini-2.5-pro",
            vec![
                Message::user("look it up"),
                Message::ToolCall {
                    call_id: "call_1".into(),
                    name: "lookup".into(),
                    arguments: r#"{"q":"rust"}"#.into(),
                },
                Message::ToolOutput {
                    call_id: "call_1".into(),
                    output: ToolOutputContent::Text("found".into()),
                    status: None,
                },
            ],
        );

        let wire = GoogleRequest::build(&request);

        let response_part = wire
            .contents
            .iter()
            .flat_map(|c| &c.parts)
            .find_map(|part| match part {
                Part::FunctionResponse { function_response } => Some(function_response),
                _ => None,
            })
            .unwrap();

        assert_eq!(response_part.name, "lookup");
        assert_eq!(response_part.response["result"], "found");
    }

    #[test]
    fn system_instruction_is_split_out() {
        let request = ProviderRequest::new(
            "gemini-2.5-flash",
            vec![Message::system("Be terse."), Message::user("hi")],
        );

        let wire = GoogleRequest::build(&request);
        assert!(wire.system_instruction.is_some());
        assert_eq!(wire.contents.len(), 1);
    }

    #[test]
    fn data_uri_images_become_inline_data() {
        let request = ProviderRequest::new(
            "gemini-2.5-pro",
            vec![Message::Conversational {
                role: Role::User,
                content: MessageContent::Parts(vec![ContentPart::Image {
                    image_url: "data:image/png;base64,AAAA".into(),
                    detail: crate::messages::ImageDetail::Auto,
                }]),
                status: None,
            }],
        );

        let wire = GoogleRequest::build(&request);
        let Part::InlineData { inline_data } = &wire.contents[0].parts[0] else {
            panic!("expected inline data");
        };
        assert_eq!(inline_data.mime_type, "image/png");
        assert_eq!(inline_data.data, "AAAA");
    }
}
