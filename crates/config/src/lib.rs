//! Configuration for the magi core, sourced from the process environment.
//!
//! Every provider credential is optional: a missing or malformed key only
//! disables that provider, it never aborts startup. Keys are held as
//! [`SecretString`] and exposed solely at header-construction sites.

#![deny(missing_docs)]

mod keys;

use std::path::PathBuf;

pub use keys::{KeyShape, ProviderCredential};
use secrecy::SecretString;

/// Default token ceiling for the conversation history before compaction.
pub const DEFAULT_HISTORY_TOKEN_CEILING: u64 = 20_000;

/// Minimum number of messages compaction always leaves in place.
pub const DEFAULT_HISTORY_FLOOR: usize = 4;

/// Identifier of a remote LLM backend the core knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    /// OpenAI (Responses API).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini.
    Google,
    /// xAI Grok (Chat Completions compatible).
    Xai,
    /// DeepSeek (Chat Completions compatible).
    DeepSeek,
    /// OpenRouter aggregation gateway (Chat Completions compatible).
    OpenRouter,
    /// Subprocess-backed Claude CLI.
    ClaudeCli,
    /// In-process deterministic test backend.
    Test,
}

impl ProviderId {
    /// Stable lowercase name used in logs, file names and quota keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Xai => "xai",
            Self::DeepSeek => "deepseek",
            Self::OpenRouter => "openrouter",
            Self::ClaudeCli => "claude-cli",
            Self::Test => "test",
        }
    }

    /// All providers that require a remote credential.
    pub fn remote() -> &'static [ProviderId] {
        &[
            Self::OpenAi,
            Self::Anthropic,
            Self::Google,
            Self::Xai,
            Self::DeepSeek,
            Self::OpenRouter,
        ]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved configuration snapshot shared by the whole engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Validated provider credentials. Absent entries mean the provider is
    /// unavailable until the process is restarted with a key.
    credentials: Vec<ProviderCredential>,

    /// Display name of the assistant, used when rendering history for
    /// summarization. Defaults to `"Magi"`.
    pub ai_name: String,

    /// Display name of the human, used when rendering history for
    /// summarization. Defaults to `"Human"`.
    pub your_name: String,

    /// Directory for the per-request JSON log files. Logging is disabled
    /// when unset.
    pub request_log_dir: Option<PathBuf>,

    /// Soft ceiling (approximate tokens) on the conversation history.
    pub history_token_ceiling: u64,

    /// Compaction never reduces the history below this many messages.
    pub history_floor: usize,

    /// Binary name for the subprocess adapter.
    pub claude_binary: String,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Missing keys only disable the corresponding provider; malformed keys
    /// are logged and treated as missing.
    pub fn from_env() -> Self {
        let mut credentials = Vec::new();

        for &provider in ProviderId::remote() {
            let var = env_var_for(provider);

            match std::env::var(var) {
                Ok(value) if !value.trim().is_empty() => {
                    let value = value.trim().to_string();

                    if KeyShape::for_provider(provider).validates(&value) {
                        credentials.push(ProviderCredential::new(provider, SecretString::from(value)));
                    } else {
                        log::warn!("{var} is set but does not look like a {provider} key; ignoring it");
                    }
                }
                _ => {
                    log::debug!("{var} not set; provider {provider} disabled");
                }
            }
        }

        Self {
            credentials,
            ai_name: std::env::var("AI_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Magi".to_string()),
            your_name: std::env::var("YOUR_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Human".to_string()),
            request_log_dir: None,
            history_token_ceiling: DEFAULT_HISTORY_TOKEN_CEILING,
            history_floor: DEFAULT_HISTORY_FLOOR,
            claude_binary: "claude".to_string(),
        }
    }

    /// An empty configuration with no credentials. Useful for tests and for
    /// callers that inject credentials programmatically.
    pub fn empty() -> Self {
        Self {
            credentials: Vec::new(),
            ai_name: "Magi".to_string(),
            your_name: "Human".to_string(),
            request_log_dir: None,
            history_token_ceiling: DEFAULT_HISTORY_TOKEN_CEILING,
            history_floor: DEFAULT_HISTORY_FLOOR,
            claude_binary: "claude".to_string(),
        }
    }

    /// Inject a credential, replacing any previous one for the provider.
    pub fn with_credential(mut self, provider: ProviderId, key: SecretString) -> Self {
        self.credentials.retain(|c| c.provider() != provider);
        self.credentials.push(ProviderCredential::new(provider, key));
        self
    }

    /// Set the request-log directory.
    pub fn with_request_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.request_log_dir = Some(dir.into());
        self
    }

    /// Set the history soft ceiling and floor.
    pub fn with_history_bounds(mut self, ceiling_tokens: u64, floor_messages: usize) -> Self {
        self.history_token_ceiling = ceiling_tokens;
        self.history_floor = floor_messages;
        self
    }

    /// Whether a usable credential exists for the provider.
    ///
    /// The subprocess and test backends never need one.
    pub fn has_credentials(&self, provider: ProviderId) -> bool {
        matches!(provider, ProviderId::ClaudeCli | ProviderId::Test) || self.credential(provider).is_some()
    }

    /// The validated credential for a provider, if present.
    pub fn credential(&self, provider: ProviderId) -> Option<&ProviderCredential> {
        self.credentials.iter().find(|c| c.provider() == provider)
    }
}

fn env_var_for(provider: ProviderId) -> &'static str {
    match provider {
        ProviderId::OpenAi => "OPENAI_API_KEY",
        ProviderId::Anthropic => "ANTHROPIC_API_KEY",
        ProviderId::Google => "GOOGLE_API_KEY",
        ProviderId::Xai => "XAI_API_KEY",
        ProviderId::DeepSeek => "DEEPSEEK_API_KEY",
        ProviderId::OpenRouter => "OPENROUTER_API_KEY",
        ProviderId::ClaudeCli | ProviderId::Test => unreachable!("local providers have no key"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_disable_providers_without_failing() {
        temp_env::with_vars_unset(["OPENAI_API_KEY", "ANTHROPIC_API_KEY", "OPENROUTER_API_KEY"], || {
            let config = Config::from_env();

            assert!(!config.has_credentials(ProviderId::OpenAi));
            assert!(!config.has_credentials(ProviderId::OpenRouter));

            // Local backends never need a key.
            assert!(config.has_credentials(ProviderId::Test));
            assert!(config.has_credentials(ProviderId::ClaudeCli));
        });
    }

    #[test]
    fn malformed_key_is_treated_as_missing() {
        temp_env::with_var("ANTHROPIC_API_KEY", Some("not-an-anthropic-key"), || {
            let config = Config::from_env();
            assert!(!config.has_credentials(ProviderId::Anthropic));
        });
    }

    #[test]
    fn well_shaped_key_enables_provider() {
        temp_env::with_var("ANTHROPIC_API_KEY", Some("sk-ant-api03-abcdef"), || {
            let config = Config::from_env();
            assert!(config.has_credentials(ProviderId::Anthropic));
        });
    }

    #[test]
    fn identity_labels_default() {
        temp_env::with_vars_unset(["AI_NAME", "YOUR_NAME"], || {
            let config = Config::from_env();
            assert_eq!(config.ai_name, "Magi");
            assert_eq!(config.your_name, "Human");
        });
    }

    #[test]
    fn identity_labels_from_env() {
        temp_env::with_vars([("AI_NAME", Some("Balthasar")), ("YOUR_NAME", Some("Ada"))], || {
            let config = Config::from_env();
            assert_eq!(config.ai_name, "Balthasar");
            assert_eq!(config.your_name, "Ada");
        });
    }
}
