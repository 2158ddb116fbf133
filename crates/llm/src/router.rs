//! Model-id → adapter routing.
//!
//! Routing is by model-id prefix, longest (most specific) prefix first.
//! Ids that match no rule fall through to OpenRouter when it is
//! configured. A provider whose credential is missing is unavailable; if
//! the registry knows an OpenRouter id for the model, the router falls
//! back to the OpenRouter adapter pinned to that id.

use std::collections::HashMap;
use std::sync::Arc;

use config::{Config, ProviderId};
use itertools::Itertools;

use crate::error::{LlmError, Result};
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::claude_cli::ClaudeCliProvider;
use crate::provider::google::GoogleProvider;
use crate::provider::openai::OpenAiProvider;
use crate::provider::openai_chat::ChatCompatProvider;
use crate::provider::test::TestProvider;
use crate::provider::Provider;
use crate::registry::ModelRegistry;

/// Prefix rules, consulted longest-match-first. `claude-code` must beat
/// `claude-`, which is why matching is by longest prefix rather than list
/// order.
const PREFIX_RULES: &[(&str, ProviderId)] = &[
    ("claude-code", ProviderId::ClaudeCli),
    ("claude-", ProviderId::Anthropic),
    ("computer-use-preview", ProviderId::OpenAi),
    ("codex-", ProviderId::OpenAi),
    ("gpt-", ProviderId::OpenAi),
    ("o1", ProviderId::OpenAi),
    ("o3", ProviderId::OpenAi),
    ("o4-", ProviderId::OpenAi),
    ("text-embedding-", ProviderId::OpenAi),
    ("gemini-", ProviderId::Google),
    ("imagen-", ProviderId::Google),
    ("grok-", ProviderId::Xai),
    ("deepseek-", ProviderId::DeepSeek),
    ("test-", ProviderId::Test),
];

/// A resolved route: the adapter to call and the model id to send it
/// (which differs from the requested id on the OpenRouter fallback path).
#[derive(Clone)]
pub struct RoutedModel {
    pub provider: ProviderId,
    pub adapter: Arc<dyn Provider>,
    pub model_id: String,
}

impl std::fmt::Debug for RoutedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedModel")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .finish()
    }
}

pub struct ProviderRouter {
    config: Arc<Config>,
    registry: Arc<ModelRegistry>,
    adapters: HashMap<ProviderId, Arc<dyn Provider>>,
}

impl ProviderRouter {
    /// Build adapters for every provider with usable credentials. The
    /// subprocess and test backends are always available.
    pub fn new(config: Arc<Config>, registry: Arc<ModelRegistry>) -> Self {
        let mut adapters: HashMap<ProviderId, Arc<dyn Provider>> = HashMap::new();

        adapters.insert(ProviderId::Test, Arc::new(TestProvider::new()));
        adapters.insert(
            ProviderId::ClaudeCli,
            Arc::new(ClaudeCliProvider::new(config.claude_binary.clone())),
        );

        for &provider in ProviderId::remote() {
            let Some(credential) = config.credential(provider) else {
                continue;
            };
            let key = credential.key().clone();

            let adapter: std::result::Result<Arc<dyn Provider>, LlmError> = match provider {
                ProviderId::OpenAi => OpenAiProvider::new(registry.clone(), key).map(|a| Arc::new(a) as _),
                ProviderId::Anthropic => AnthropicProvider::new(registry.clone(), key).map(|a| Arc::new(a) as _),
                ProviderId::Google => GoogleProvider::new(key).map(|a| Arc::new(a) as _),
                ProviderId::Xai => ChatCompatProvider::xai(registry.clone(), key).map(|a| Arc::new(a) as _),
                ProviderId::DeepSeek => ChatCompatProvider::deepseek(registry.clone(), key).map(|a| Arc::new(a) as _),
                ProviderId::OpenRouter => {
                    ChatCompatProvider::openrouter(registry.clone(), key).map(|a| Arc::new(a) as _)
                }
                ProviderId::ClaudeCli | ProviderId::Test => unreachable!("local providers built above"),
            };

            match adapter {
                Ok(adapter) => {
                    adapters.insert(provider, adapter);
                }
                Err(e) => log::error!("failed to initialize {provider} adapter: {e}"),
            }
        }

        Self {
            config,
            registry,
            adapters,
        }
    }

    /// Install or replace an adapter instance. Primarily for tests that
    /// point adapters at mock endpoints.
    pub fn set_adapter(&mut self, provider: ProviderId, adapter: Arc<dyn Provider>) {
        self.adapters.insert(provider, adapter);
    }

    /// Which provider a model id belongs to, by longest matching prefix.
    /// `None` means the OpenRouter fallback bucket.
    pub fn provider_for(&self, model_id: &str) -> Option<ProviderId> {
        PREFIX_RULES
            .iter()
            .filter(|(prefix, _)| model_id.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, provider)| *provider)
    }

    /// Whether the provider has a usable credential.
    pub fn has_credentials(&self, provider: ProviderId) -> bool {
        self.config.has_credentials(provider)
    }

    /// Resolve a concrete model id (or alias) to an adapter.
    pub fn route(&self, id_or_alias: &str) -> Result<RoutedModel> {
        // Aliases resolve through the registry; unregistered ids route on
        // their raw prefix so newly-released models work without a catalog
        // update.
        let entry = self.registry.find(id_or_alias);
        let model_id = entry.map(|e| e.id.clone()).unwrap_or_else(|| id_or_alias.to_string());

        let provider = match self.provider_for(&model_id) {
            Some(provider) => provider,
            None => {
                // Unmatched ids belong to the OpenRouter catalog.
                if self.adapters.contains_key(&ProviderId::OpenRouter) {
                    let adapter = self.adapters[&ProviderId::OpenRouter].clone();
                    return Ok(RoutedModel {
                        provider: ProviderId::OpenRouter,
                        adapter,
                        model_id,
                    });
                }

                log::warn!(
                    "model '{id_or_alias}' matched no prefix rule and no OpenRouter key is configured (available: [{}])",
                    self.adapters.keys().map(|p| p.as_str()).join(", ")
                );
                return Err(LlmError::ModelUnknown(id_or_alias.to_string()));
            }
        };

        if let Some(adapter) = self.adapters.get(&provider) {
            return Ok(RoutedModel {
                provider,
                adapter: adapter.clone(),
                model_id,
            });
        }

        // Direct provider key missing; fall back to OpenRouter when the
        // catalog carries an OpenRouter id for this model.
        if let Some(openrouter_id) = entry.and_then(|e| e.openrouter_id.clone())
            && let Some(adapter) = self.adapters.get(&ProviderId::OpenRouter)
        {
            log::debug!("provider {provider} unavailable; routing {model_id} through openrouter as {openrouter_id}");
            return Ok(RoutedModel {
                provider: ProviderId::OpenRouter,
                adapter: adapter.clone(),
                model_id: openrouter_id,
            });
        }

        Err(LlmError::ConfigurationMissing {
            provider: provider.to_string(),
            detail: format!("no API key configured (and no OpenRouter fallback for '{model_id}')"),
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn router_with(providers: &[(ProviderId, &str)]) -> ProviderRouter {
        let mut config = Config::empty();
        for (provider, key) in providers {
            config = config.with_credential(*provider, SecretString::from(key.to_string()));
        }

        ProviderRouter::new(Arc::new(config), Arc::new(ModelRegistry::builtin()))
    }

    #[test]
    fn longest_prefix_wins() {
        let router = router_with(&[(ProviderId::Anthropic, "sk-ant-x")]);

        assert_eq!(router.provider_for("claude-code"), Some(ProviderId::ClaudeCli));
        assert_eq!(router.provider_for("claude-sonnet-4-0"), Some(ProviderId::Anthropic));
        assert_eq!(router.provider_for("gpt-5"), Some(ProviderId::OpenAi));
        assert_eq!(router.provider_for("o3"), Some(ProviderId::OpenAi));
        assert_eq!(router.provider_for("grok-4"), Some(ProviderId::Xai));
        assert_eq!(router.provider_for("test-standard"), Some(ProviderId::Test));
        assert_eq!(router.provider_for("meta-llama/llama-3.3-70b-instruct"), None);
    }

    #[test]
    fn local_backends_route_without_credentials() {
        let router = router_with(&[]);

        assert!(router.route("test-standard").is_ok());
        assert!(router.route("claude-code").is_ok());
    }

    #[test]
    fn missing_key_without_fallback_is_configuration_missing() {
        let router = router_with(&[]);

        let error = router.route("gemini-2.5-pro").unwrap_err();
        assert!(matches!(error, LlmError::ConfigurationMissing { .. }));
    }

    #[test]
    fn missing_key_with_openrouter_falls_back_to_openrouter_id() {
        let router = router_with(&[(ProviderId::OpenRouter, "sk-or-x")]);

        let route = router.route("gpt-5").unwrap();
        assert_eq!(route.provider, ProviderId::OpenRouter);
        assert_eq!(route.model_id, "openai/gpt-5");
    }

    #[test]
    fn aliases_resolve_before_routing() {
        let router = router_with(&[(ProviderId::OpenAi, "sk-x")]);

        let route = router.route("gpt5").unwrap();
        assert_eq!(route.provider, ProviderId::OpenAi);
        assert_eq!(route.model_id, "gpt-5");
    }

    #[test]
    fn unmatched_ids_fall_through_to_openrouter() {
        let router = router_with(&[(ProviderId::OpenRouter, "sk-or-x")]);

        let route = router.route("meta-llama/llama-3.3-70b-instruct").unwrap();
        assert_eq!(route.provider, ProviderId::OpenRouter);

        let no_fallback = router_with(&[]);
        assert!(matches!(
            no_fallback.route("meta-llama/llama-3.3-70b-instruct").unwrap_err(),
            LlmError::ModelUnknown(_)
        ));
    }
}
