//! Snapshot payloads delivered to the quota sink.

use jiff::Timestamp;
use serde::Serialize;

/// Why a snapshot was emitted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotaTrigger {
    /// Usage crossed a 10% bucket boundary of some limit.
    BoundaryCrossed {
        /// Which counter crossed, e.g. `"gpt-5-mini/daily_tokens"`.
        scope: String,
        /// The boundary that was crossed, as a percentage (10..=100).
        percent: u8,
    },
    /// Usage reached or exceeded a limit.
    LimitHit {
        /// Which counter hit its limit.
        scope: String,
    },
    /// Snapshot requested explicitly rather than by a crossing.
    Requested,
}

/// Point-in-time view of one provider's quota state.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaSnapshot {
    /// Provider name.
    pub provider: String,
    /// When the snapshot was taken.
    pub timestamp: Timestamp,
    /// What prompted the emission.
    pub trigger: QuotaTrigger,
    /// Credit ceiling, if configured.
    pub credit_limit: Option<f64>,
    /// Money spent so far.
    pub credit_used: f64,
    /// Per-model counters.
    pub models: Vec<ModelQuotaSnapshot>,
    /// Family bucket levels.
    pub families: Vec<FamilyQuotaSnapshot>,
}

/// Counters for a single model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelQuotaSnapshot {
    /// Model id.
    pub model: String,
    /// Daily token allowance, if limited.
    pub daily_token_limit: Option<u64>,
    /// Tokens consumed today.
    pub tokens_used: u64,
    /// Daily request allowance, if limited.
    pub daily_request_limit: Option<u64>,
    /// Requests made today.
    pub requests_used: u64,
}

/// Level of one family bucket.
#[derive(Debug, Clone, Serialize)]
pub struct FamilyQuotaSnapshot {
    /// Bucket name.
    pub name: String,
    /// Daily token allowance for the pool.
    pub daily_token_limit: u64,
    /// Tokens consumed from the pool today.
    pub tokens_used: u64,
}

pub(crate) fn build(
    provider: &str,
    credit_limit: Option<f64>,
    credit_used: f64,
    models: &[ModelQuotaSnapshot],
    families: &[FamilyQuotaSnapshot],
) -> QuotaSnapshot {
    QuotaSnapshot {
        provider: provider.to_string(),
        timestamp: Timestamp::now(),
        trigger: QuotaTrigger::Requested,
        credit_limit,
        credit_used,
        models: models.to_vec(),
        families: families.to_vec(),
    }
}
