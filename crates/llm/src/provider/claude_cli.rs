//! The subprocess-backed adapter.
//!
//! Runs a local CLI (`claude` by default) in a caller-chosen working
//! directory, buffers stdout until process exit, strips terminal control
//! sequences, and parses the JSON result `{result, cost_usd}`. The stream
//! is a single `message_complete` followed by `cost_update` and
//! `stream_end`; the reported dollar cost rides in the usage metadata so
//! the cost engine books it directly instead of pricing tokens.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;

use crate::error::{LlmError, Result};
use crate::events::StreamEvent;
use crate::messages::Message;
use crate::provider::{EventStream, Provider, error_event};
use crate::request::{ProviderRequest, RequestContext};
use crate::usage::UsageRecord;

/// Metadata key carrying a provider-reported dollar cost.
pub const COST_OVERRIDE_KEY: &str = "cost_usd";

static ANSI_ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("ANSI pattern compiles")
});

pub struct ClaudeCliProvider {
    binary: String,
    working_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CliOutput {
    result: String,
    #[serde(default)]
    cost_usd: f64,
}

impl ClaudeCliProvider {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: None,
        }
    }

    /// Run the CLI in the given directory instead of the process cwd.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Provider for ClaudeCliProvider {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn stream(&self, request: ProviderRequest, context: &RequestContext) -> Result<EventStream> {
        let prompt = render_prompt(&request.messages);
        let model = request.model.clone();
        let binary = self.binary.clone();
        let working_dir = self.working_dir.clone();

        context.log_request(
            self.name(),
            &model,
            &serde_json::json!({
                "binary": binary,
                "args": ["--print", "--json", "--dangerously-skip-permissions", "-p", "<prompt>"],
                "prompt": prompt,
            }),
        );

        let cancel = context.cancel.clone();
        let deadline = context.deadline;

        let events = async move {
            let mut command = tokio::process::Command::new(&binary);
            command
                .arg("--print")
                .arg("--json")
                .arg("--dangerously-skip-permissions")
                .arg("-p")
                .arg(&prompt)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            if let Some(dir) = &working_dir {
                command.current_dir(dir);
            }

            let child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    return vec![
                        error_event(&LlmError::SubprocessFailure(format!("failed to spawn {binary}: {e}"))),
                        StreamEvent::StreamEnd {},
                    ];
                }
            };

            let output = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return vec![error_event(&LlmError::Cancelled), StreamEvent::StreamEnd {}];
                }

                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    return vec![error_event(&LlmError::Timeout), StreamEvent::StreamEnd {}];
                }

                output = child.wait_with_output() => output,
            };

            let output = match output {
                Ok(output) => output,
                Err(e) => {
                    return vec![
                        error_event(&LlmError::SubprocessFailure(format!("failed to read {binary} output: {e}"))),
                        StreamEvent::StreamEnd {},
                    ];
                }
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: String = stderr.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
                log::error!("{binary} exited with {}: {tail}", output.status);

                return vec![
                    error_event(&LlmError::SubprocessFailure(format!(
                        "{binary} exited with {}: {tail}",
                        output.status
                    ))),
                    StreamEvent::StreamEnd {},
                ];
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let clean = strip_control_sequences(&stdout);

            let parsed: CliOutput = match serde_json::from_str(clean.trim()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::error!("unparseable {binary} output: {e}");
                    return vec![
                        error_event(&LlmError::SubprocessFailure(format!("unparseable {binary} JSON output: {e}"))),
                        StreamEvent::StreamEnd {},
                    ];
                }
            };

            let mut usage = UsageRecord::new(&model);
            usage
                .metadata
                .insert(COST_OVERRIDE_KEY.to_string(), parsed.cost_usd.to_string());

            vec![
                StreamEvent::MessageComplete {
                    message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
                    content: parsed.result,
                },
                StreamEvent::CostUpdate { usage },
                StreamEvent::StreamEnd {},
            ]
        };

        Ok(Box::pin(
            futures::stream::once(events).map(futures::stream::iter).flatten(),
        ))
    }
}

/// Render the canonical conversation as a single prompt for the CLI.
fn render_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();

    for message in messages {
        let text = message.render_text();
        if text.is_empty() {
            continue;
        }

        let label = match message.effective_role() {
            crate::messages::Role::System | crate::messages::Role::Developer => "System",
            crate::messages::Role::User => "User",
            crate::messages::Role::Assistant => "Assistant",
        };

        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&text);
        prompt.push_str("\n\n");
    }

    prompt.trim_end().to_string()
}

/// Strip ANSI escape sequences and stray control characters so the JSON
/// parser sees clean text.
fn strip_control_sequences(raw: &str) -> String {
    let without_ansi = ANSI_ESCAPES.replace_all(raw, "");
    without_ansi
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}
