//! Concrete-model selection from a capability class.
//!
//! Two-pass policy: prefer a model whose provider has a key *and* quota
//! headroom; failing that, accept key-only (controlled over-quota use —
//! quota is advisory, a missing key is not). Non-standard classes retry
//! against `standard` before the last resort: the class's first member is
//! returned even without a key, so the request fails with a proper
//! configuration error instead of a silent no-op.

use quota::QuotaManager;

use crate::error::{LlmError, Result};
use crate::registry::{ModelClass, ModelRegistry};
use crate::router::ProviderRouter;

pub struct ModelSelector<'a> {
    registry: &'a ModelRegistry,
    router: &'a ProviderRouter,
    quota: &'a QuotaManager,
}

impl<'a> ModelSelector<'a> {
    pub fn new(registry: &'a ModelRegistry, router: &'a ProviderRouter, quota: &'a QuotaManager) -> Self {
        Self {
            registry,
            router,
            quota,
        }
    }

    /// Pick a concrete model id for the class.
    pub fn select(&self, class: ModelClass) -> Result<String> {
        if let Some(id) = self.select_in_class(class) {
            return Ok(id);
        }

        if class != ModelClass::Standard
            && let Some(id) = self.select_in_class(ModelClass::Standard)
        {
            log::debug!("no usable {class} model; selected from standard instead");
            return Ok(id);
        }

        // Last resort: surface a proper authentication error downstream
        // rather than failing opaquely here.
        self.registry
            .class_members(class)
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ModelUnknown(class.to_string()))
    }

    fn select_in_class(&self, class: ModelClass) -> Option<String> {
        let members = self.registry.class_members(class);

        // Pass A: key + quota.
        for id in &members {
            if self.has_key(id) && self.has_quota(id) {
                return Some(id.clone());
            }
        }

        // Pass B: key only; the caller accepted over-quota use by getting
        // here.
        for id in &members {
            if self.has_key(id) {
                log::warn!("selecting {id} despite exhausted quota");
                return Some(id.clone());
            }
        }

        None
    }

    fn has_key(&self, model_id: &str) -> bool {
        let Some(entry) = self.registry.find(model_id) else {
            return false;
        };

        self.router.has_credentials(entry.provider)
    }

    fn has_quota(&self, model_id: &str) -> bool {
        let Some(entry) = self.registry.find(model_id) else {
            return false;
        };

        self.quota.has_quota(entry.provider.as_str(), model_id)
    }
}
