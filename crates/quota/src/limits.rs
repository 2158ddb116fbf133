//! Limit configuration registered per provider.

/// Limits for one provider: an optional credit ceiling, per-model daily and
/// rate limits, and shared family token pools.
#[derive(Debug, Clone, Default)]
pub struct ProviderLimits {
    /// Money ceiling for this provider, in the provider's billing currency.
    pub credit_limit: Option<f64>,
    /// Per-model limits.
    pub models: Vec<ModelLimits>,
    /// Shared token pools across sets of models.
    pub families: Vec<FamilyLimits>,
}

impl ProviderLimits {
    /// Set the credit ceiling.
    pub fn with_credit_limit(mut self, limit: f64) -> Self {
        self.credit_limit = Some(limit);
        self
    }

    /// Add limits for one model.
    pub fn with_model(mut self, model: ModelLimits) -> Self {
        self.models.push(model);
        self
    }

    /// Add a shared family bucket.
    pub fn with_family(mut self, family: FamilyLimits) -> Self {
        self.families.push(family);
        self
    }
}

/// Daily and per-minute limits for a single model.
#[derive(Debug, Clone)]
pub struct ModelLimits {
    /// Model id these limits apply to.
    pub model: String,
    /// Daily token allowance (input + output).
    pub daily_tokens: Option<u64>,
    /// Daily request allowance.
    pub daily_requests: Option<u64>,
    /// Requests per minute.
    pub rpm: Option<u32>,
    /// Tokens per minute.
    pub tpm: Option<u32>,
}

impl ModelLimits {
    /// Limits for a model with everything unset.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            daily_tokens: None,
            daily_requests: None,
            rpm: None,
            tpm: None,
        }
    }

    pub(crate) fn unlimited(model: &str) -> Self {
        Self::new(model)
    }

    /// Set the daily token allowance.
    pub fn daily_tokens(mut self, limit: u64) -> Self {
        self.daily_tokens = Some(limit);
        self
    }

    /// Set the daily request allowance.
    pub fn daily_requests(mut self, limit: u64) -> Self {
        self.daily_requests = Some(limit);
        self
    }

    /// Set the requests-per-minute guard.
    pub fn rpm(mut self, limit: u32) -> Self {
        self.rpm = Some(limit);
        self
    }

    /// Set the tokens-per-minute guard.
    pub fn tpm(mut self, limit: u32) -> Self {
        self.tpm = Some(limit);
        self
    }
}

/// A token pool shared by several models of one provider.
#[derive(Debug, Clone)]
pub struct FamilyLimits {
    /// Bucket name, unique within the provider.
    pub name: String,
    /// Model ids drawing from this pool.
    pub members: Vec<String>,
    /// Daily token allowance for the whole pool.
    pub daily_tokens: u64,
}

impl FamilyLimits {
    /// A named family over the given member models.
    pub fn new<I, S>(name: impl Into<String>, members: I, daily_tokens: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
            daily_tokens,
        }
    }
}
