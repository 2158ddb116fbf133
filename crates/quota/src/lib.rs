//! Daily and rate quota accounting for LLM providers.
//!
//! The manager tracks three kinds of budget per provider:
//!
//! - a credit balance (money already spent against an optional limit),
//! - per-model daily token/request counters that reset at the UTC day
//!   boundary,
//! - named *family* buckets: token pools shared by a set of model ids
//!   (the OpenAI-style shared daily allowance).
//!
//! Short-horizon rpm/tpm guards are enforced with `governor` limiters at
//! [`QuotaManager::track`] time; the limiter cells are consume-on-check, so
//! pre-flight reads ([`QuotaManager::has_quota`]) only consult the daily and
//! credit state.
//!
//! All counter mutation happens under a single mutex ([`QuotaManager::track`]
//! is the only writer path); snapshots are detached copies.

mod limits;
mod snapshot;

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use jiff::Timestamp;
use jiff::civil::Date;
use jiff::tz::TimeZone;

pub use limits::{FamilyLimits, ModelLimits, ProviderLimits};
pub use snapshot::{FamilyQuotaSnapshot, ModelQuotaSnapshot, QuotaSnapshot, QuotaTrigger};

type DirectLimiter = DefaultDirectRateLimiter;

/// Callback receiving [`QuotaSnapshot`]s whenever usage crosses a 10% bucket
/// boundary of any limit, or a limit is hit.
pub type QuotaSink = Arc<dyn Fn(QuotaSnapshot) + Send + Sync>;

/// Process-wide quota accounting across providers.
pub struct QuotaManager {
    state: Mutex<HashMap<String, ProviderState>>,
    limiters: Mutex<HashMap<String, Arc<DirectLimiter>>>,
    sink: Option<QuotaSink>,
}

struct ProviderState {
    credit_limit: Option<f64>,
    credit_used: f64,
    last_reset: Option<Date>,
    models: HashMap<String, ModelState>,
    families: Vec<FamilyState>,
}

struct ModelState {
    limits: ModelLimits,
    tokens_used: u64,
    requests_used: u64,
}

struct FamilyState {
    limits: FamilyLimits,
    tokens_used: u64,
}

impl ProviderState {
    fn new(limits: ProviderLimits) -> Self {
        Self {
            credit_limit: limits.credit_limit,
            credit_used: 0.0,
            last_reset: None,
            models: limits
                .models
                .into_iter()
                .map(|m| {
                    (
                        m.model.clone(),
                        ModelState {
                            limits: m,
                            tokens_used: 0,
                            requests_used: 0,
                        },
                    )
                })
                .collect(),
            families: limits
                .families
                .into_iter()
                .map(|f| FamilyState {
                    limits: f,
                    tokens_used: 0,
                })
                .collect(),
        }
    }

    fn unlimited() -> Self {
        Self::new(ProviderLimits::default())
    }

    /// Zero every daily counter. Runs atomically under the manager lock.
    fn reset_daily(&mut self, today: Date) {
        for model in self.models.values_mut() {
            model.tokens_used = 0;
            model.requests_used = 0;
        }
        for family in &mut self.families {
            family.tokens_used = 0;
        }
        self.last_reset = Some(today);
    }

    /// Whether the stored counters belong to an earlier UTC day.
    ///
    /// Counters are only mutated by `track`; read paths treat stale counters
    /// as zero instead of resetting them.
    fn is_stale(&self, today: Date) -> bool {
        self.last_reset.is_some_and(|d| d != today)
    }
}

impl QuotaManager {
    /// A manager with no snapshot sink.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            limiters: Mutex::new(HashMap::new()),
            sink: None,
        }
    }

    /// A manager that delivers [`QuotaSnapshot`]s to the given sink.
    pub fn with_sink(sink: QuotaSink) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            limiters: Mutex::new(HashMap::new()),
            sink: Some(sink),
        }
    }

    /// Install the limit configuration for a provider, replacing any
    /// previous registration. Counters restart from zero.
    pub fn register_provider(&self, provider: &str, limits: ProviderLimits) {
        {
            let mut limiters = self.limiters.lock().expect("quota limiter lock poisoned");

            for model in &limits.models {
                if let Some(rpm) = model.rpm.and_then(NonZeroU32::new) {
                    limiters.insert(
                        limiter_key(provider, &model.model, "rpm"),
                        Arc::new(RateLimiter::direct(Quota::per_minute(rpm))),
                    );
                }
                if let Some(tpm) = model.tpm.and_then(NonZeroU32::new) {
                    limiters.insert(
                        limiter_key(provider, &model.model, "tpm"),
                        Arc::new(RateLimiter::direct(Quota::per_minute(tpm))),
                    );
                }
            }
        }

        let mut state = self.state.lock().expect("quota state lock poisoned");
        state.insert(provider.to_string(), ProviderState::new(limits));
    }

    /// Advisory pre-flight check: does the provider/model pair still have
    /// daily, family and credit headroom?
    ///
    /// Unregistered providers and models are unlimited. The answer is
    /// advisory: callers on an over-quota escape path may proceed anyway.
    pub fn has_quota(&self, provider: &str, model: &str) -> bool {
        let state = self.state.lock().expect("quota state lock poisoned");

        let Some(provider_state) = state.get(provider) else {
            return true;
        };

        if let Some(limit) = provider_state.credit_limit
            && provider_state.credit_used >= limit
        {
            return false;
        }

        // Counters from a previous UTC day count as zero; they are reset by
        // the first `track` of the new day, not here.
        if provider_state.is_stale(today_utc()) {
            return true;
        }

        if let Some(model_state) = provider_state.models.get(model) {
            if let Some(limit) = model_state.limits.daily_tokens
                && model_state.tokens_used >= limit
            {
                return false;
            }
            if let Some(limit) = model_state.limits.daily_requests
                && model_state.requests_used >= limit
            {
                return false;
            }
        }

        for family in &provider_state.families {
            if family.limits.members.iter().any(|m| m == model) && family.tokens_used >= family.limits.daily_tokens {
                return false;
            }
        }

        true
    }

    /// Record consumed tokens for a provider/model pair.
    ///
    /// Returns `false` iff this call made usage reach a daily/family limit
    /// or tripped an rpm/tpm guard. A `(0, 0)` track is a counter no-op that
    /// still performs the daily-reset check.
    pub fn track(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64) -> bool {
        self.track_at(provider, model, input_tokens, output_tokens, today_utc())
    }

    fn track_at(&self, provider: &str, model: &str, input_tokens: u64, output_tokens: u64, today: Date) -> bool {
        let tokens = input_tokens + output_tokens;
        let mut emit: Option<QuotaTrigger> = None;
        let mut hit = false;

        {
            let mut state = self.state.lock().expect("quota state lock poisoned");
            let provider_state = state
                .entry(provider.to_string())
                .or_insert_with(ProviderState::unlimited);

            if provider_state.last_reset != Some(today) {
                provider_state.reset_daily(today);
            }

            if tokens == 0 {
                return true;
            }

            let model_state = provider_state.models.entry(model.to_string()).or_insert(ModelState {
                limits: ModelLimits::unlimited(model),
                tokens_used: 0,
                requests_used: 0,
            });

            let tokens_before = model_state.tokens_used;
            let requests_before = model_state.requests_used;
            model_state.tokens_used += tokens;
            model_state.requests_used += 1;

            if let Some(limit) = model_state.limits.daily_tokens {
                if crossed_limit(tokens_before, model_state.tokens_used, limit) {
                    hit = true;
                    emit = Some(QuotaTrigger::LimitHit {
                        scope: format!("{model}/daily_tokens"),
                    });
                } else if let Some(pct) = crossed_decile(tokens_before, model_state.tokens_used, limit) {
                    emit.get_or_insert(QuotaTrigger::BoundaryCrossed {
                        scope: format!("{model}/daily_tokens"),
                        percent: pct,
                    });
                }
            }

            if let Some(limit) = model_state.limits.daily_requests {
                if crossed_limit(requests_before, model_state.requests_used, limit) {
                    hit = true;
                    emit = Some(QuotaTrigger::LimitHit {
                        scope: format!("{model}/daily_requests"),
                    });
                } else if let Some(pct) = crossed_decile(requests_before, model_state.requests_used, limit) {
                    emit.get_or_insert(QuotaTrigger::BoundaryCrossed {
                        scope: format!("{model}/daily_requests"),
                        percent: pct,
                    });
                }
            }

            for family in &mut provider_state.families {
                if !family.limits.members.iter().any(|m| m == model) {
                    continue;
                }

                let before = family.tokens_used;
                family.tokens_used += tokens;

                if crossed_limit(before, family.tokens_used, family.limits.daily_tokens) {
                    hit = true;
                    emit = Some(QuotaTrigger::LimitHit {
                        scope: format!("family:{}", family.limits.name),
                    });
                } else if let Some(pct) = crossed_decile(before, family.tokens_used, family.limits.daily_tokens) {
                    emit.get_or_insert(QuotaTrigger::BoundaryCrossed {
                        scope: format!("family:{}", family.limits.name),
                        percent: pct,
                    });
                }
            }
        }

        let mut rate_limited = false;

        if let Some(limiter) = self.limiter(provider, model, "rpm")
            && limiter.check().is_err()
        {
            log::warn!("{provider}/{model} exceeded its requests-per-minute guard");
            rate_limited = true;
        }

        if let Some(limiter) = self.limiter(provider, model, "tpm")
            && let Some(n) = NonZeroU32::new(u32::try_from(tokens).unwrap_or(u32::MAX))
            && !matches!(limiter.check_n(n), Ok(Ok(())))
        {
            log::warn!("{provider}/{model} exceeded its tokens-per-minute guard");
            rate_limited = true;
        }

        if rate_limited && emit.is_none() {
            emit = Some(QuotaTrigger::LimitHit {
                scope: format!("{model}/rate"),
            });
        }

        if let Some(trigger) = emit {
            self.emit(provider, trigger);
        }

        !(hit || rate_limited)
    }

    /// Record money spent against the provider's credit limit.
    pub fn record_spend(&self, provider: &str, cost: f64) {
        let mut emit = None;

        {
            let mut state = self.state.lock().expect("quota state lock poisoned");
            let provider_state = state
                .entry(provider.to_string())
                .or_insert_with(ProviderState::unlimited);

            let before = provider_state.credit_used;
            provider_state.credit_used += cost;

            if let Some(limit) = provider_state.credit_limit {
                if before < limit && provider_state.credit_used >= limit {
                    emit = Some(QuotaTrigger::LimitHit {
                        scope: "credit".to_string(),
                    });
                } else if let Some(pct) = crossed_decile_f64(before, provider_state.credit_used, limit) {
                    emit = Some(QuotaTrigger::BoundaryCrossed {
                        scope: "credit".to_string(),
                        percent: pct,
                    });
                }
            }
        }

        if let Some(trigger) = emit {
            self.emit(provider, trigger);
        }
    }

    /// Remaining credit for a provider. Providers without a configured
    /// credit limit report infinite balance.
    pub fn credit_balance(&self, provider: &str) -> f64 {
        let state = self.state.lock().expect("quota state lock poisoned");

        match state.get(provider) {
            Some(p) => match p.credit_limit {
                Some(limit) => (limit - p.credit_used).max(0.0),
                None => f64::INFINITY,
            },
            None => f64::INFINITY,
        }
    }

    /// Point-in-time snapshot of a provider's quota state.
    pub fn snapshot(&self, provider: &str) -> Option<QuotaSnapshot> {
        let state = self.state.lock().expect("quota state lock poisoned");
        state
            .get(provider)
            .map(|p| snapshot::build(provider, p.credit_limit, p.credit_used, &p.models_view(), &p.families_view()))
    }

    fn limiter(&self, provider: &str, model: &str, kind: &str) -> Option<Arc<DirectLimiter>> {
        let limiters = self.limiters.lock().expect("quota limiter lock poisoned");
        limiters.get(&limiter_key(provider, model, kind)).cloned()
    }

    fn emit(&self, provider: &str, trigger: QuotaTrigger) {
        let Some(sink) = &self.sink else { return };
        let Some(mut snapshot) = self.snapshot(provider) else {
            return;
        };

        snapshot.trigger = trigger;
        sink(snapshot);
    }
}

impl Default for QuotaManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderState {
    fn models_view(&self) -> Vec<ModelQuotaSnapshot> {
        self.models
            .iter()
            .map(|(name, m)| ModelQuotaSnapshot {
                model: name.clone(),
                daily_token_limit: m.limits.daily_tokens,
                tokens_used: m.tokens_used,
                daily_request_limit: m.limits.daily_requests,
                requests_used: m.requests_used,
            })
            .collect()
    }

    fn families_view(&self) -> Vec<FamilyQuotaSnapshot> {
        self.families
            .iter()
            .map(|f| FamilyQuotaSnapshot {
                name: f.limits.name.clone(),
                daily_token_limit: f.limits.daily_tokens,
                tokens_used: f.tokens_used,
            })
            .collect()
    }
}

fn limiter_key(provider: &str, model: &str, kind: &str) -> String {
    format!("{provider}/{model}/{kind}")
}

fn today_utc() -> Date {
    Timestamp::now().to_zoned(TimeZone::UTC).date()
}

/// Did `after` reach or pass `limit` while `before` was still under it?
fn crossed_limit(before: u64, after: u64, limit: u64) -> bool {
    before < limit && after >= limit
}

/// The highest 10% bucket boundary crossed by this increment, if any.
fn crossed_decile(before: u64, after: u64, limit: u64) -> Option<u8> {
    if limit == 0 {
        return None;
    }

    let bucket_before = (before * 10 / limit).min(10);
    let bucket_after = (after * 10 / limit).min(10);

    (bucket_after > bucket_before).then_some((bucket_after * 10) as u8)
}

fn crossed_decile_f64(before: f64, after: f64, limit: f64) -> Option<u8> {
    if limit <= 0.0 {
        return None;
    }

    let bucket_before = ((before / limit) * 10.0).floor().min(10.0) as u64;
    let bucket_after = ((after / limit) * 10.0).floor().min(10.0) as u64;

    (bucket_after > bucket_before).then_some((bucket_after * 10) as u8)
}
