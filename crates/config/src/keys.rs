//! Credential shapes and the validated-credential wrapper.

use secrecy::SecretString;

use crate::ProviderId;

/// Expected lexical shape of a provider API key.
///
/// Shape validation is a cheap pre-flight: it catches keys pasted into the
/// wrong variable before any network round trip. It is not authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape {
    /// Key must start with the given prefix.
    Prefix(&'static str),
    /// Any non-empty value is accepted.
    NonEmpty,
}

impl KeyShape {
    /// The shape the given provider's keys follow.
    pub fn for_provider(provider: ProviderId) -> Self {
        match provider {
            // Anthropic before the generic `sk-` providers: its keys share
            // the `sk-` prefix but carry the `sk-ant-` marker.
            ProviderId::Anthropic => Self::Prefix("sk-ant-"),
            ProviderId::OpenRouter => Self::Prefix("sk-or-"),
            ProviderId::OpenAi | ProviderId::DeepSeek => Self::Prefix("sk-"),
            ProviderId::Xai => Self::Prefix("xai-"),
            ProviderId::Google => Self::NonEmpty,
            ProviderId::ClaudeCli | ProviderId::Test => Self::NonEmpty,
        }
    }

    /// Whether the candidate value matches this shape.
    pub fn validates(&self, candidate: &str) -> bool {
        match self {
            Self::Prefix(prefix) => candidate.starts_with(prefix) && candidate.len() > prefix.len(),
            Self::NonEmpty => !candidate.is_empty(),
        }
    }
}

/// An API key that passed shape validation for its provider.
#[derive(Debug, Clone)]
pub struct ProviderCredential {
    provider: ProviderId,
    key: SecretString,
}

impl ProviderCredential {
    pub(crate) fn new(provider: ProviderId, key: SecretString) -> Self {
        Self { provider, key }
    }

    /// The provider this credential belongs to.
    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    /// The secret key. Expose only at the point a header is built.
    pub fn key(&self) -> &SecretString {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_shape_rejects_plain_openai_keys() {
        let shape = KeyShape::for_provider(ProviderId::Anthropic);
        assert!(shape.validates("sk-ant-api03-xyz"));
        assert!(!shape.validates("sk-proj-xyz"));
    }

    #[test]
    fn prefix_alone_is_not_a_key() {
        let shape = KeyShape::for_provider(ProviderId::Xai);
        assert!(!shape.validates("xai-"));
        assert!(shape.validates("xai-0123"));
    }

    #[test]
    fn google_accepts_any_non_empty_value() {
        let shape = KeyShape::for_provider(ProviderId::Google);
        assert!(shape.validates("AIzaSyExample"));
        assert!(!shape.validates(""));
    }
}
