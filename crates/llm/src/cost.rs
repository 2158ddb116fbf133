//! The cost engine: turns usage records into dollars and keeps running
//! aggregates.
//!
//! Single-writer under an internal mutex; readers get detached snapshots.
//! Cumulative cost is monotonically non-decreasing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use jiff::{Timestamp, ToSpan};
use serde::Serialize;

use crate::registry::ModelRegistry;
use crate::usage::UsageRecord;

/// Point-in-time view of the engine's aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct CostSnapshot {
    /// Cumulative dollars since engine creation.
    pub total_cost: f64,
    /// Dollars accrued within the last 60 seconds.
    pub last_min_cost: f64,
    /// Requests per model id.
    pub calls_by_model: HashMap<String, u64>,
}

struct CostState {
    total_cost: f64,
    calls_by_model: HashMap<String, u64>,
    window: VecDeque<(Timestamp, f64)>,
}

/// Computes and accumulates cost from usage records and the registry's
/// pricing rules.
pub struct CostEngine {
    registry: Arc<ModelRegistry>,
    state: Mutex<CostState>,
}

impl CostEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(CostState {
                total_cost: 0.0,
                calls_by_model: HashMap::new(),
                window: VecDeque::new(),
            }),
        }
    }

    /// Price a usage record without recording it.
    ///
    /// Cached tokens are billed at the cached rate when the model has one;
    /// the remainder of the input at the input rate. Time-of-day prices are
    /// evaluated at the record's own timestamp.
    pub fn cost_of(&self, usage: &UsageRecord) -> f64 {
        // Backends that report a dollar figure directly (the subprocess
        // adapter) override token pricing.
        if let Some(direct) = usage.metadata.get(crate::provider::claude_cli::COST_OVERRIDE_KEY)
            && let Ok(direct) = direct.parse::<f64>()
        {
            return direct;
        }

        let Some(entry) = self.registry.find(&usage.model) else {
            log::debug!("No pricing for model '{}'; treating as free", usage.model);
            return 0.0;
        };

        let at = usage.timestamp;
        let mut cost = 0.0;

        let cached = usage.cached_tokens.min(usage.input_tokens);
        let billable_input = match &entry.cost.cached {
            Some(cached_price) => {
                cost += cached_price.cost_for(cached, at);
                usage.input_tokens - cached
            }
            None => usage.input_tokens,
        };

        if let Some(input_price) = &entry.cost.input {
            cost += input_price.cost_for(billable_input, at);
        }

        if let Some(output_price) = &entry.cost.output {
            cost += output_price.cost_for(usage.output_tokens, at);
        }

        if let Some(per_image) = entry.cost.per_image {
            cost += usage.image_count as f64 * per_image;
        }

        cost
    }

    /// Record a usage record, returning its incremental cost.
    pub fn record(&self, usage: &UsageRecord) -> f64 {
        let cost = self.cost_of(usage);
        let now = Timestamp::now();

        let mut state = self.state.lock().expect("cost state lock poisoned");
        state.total_cost += cost;
        *state.calls_by_model.entry(usage.model.clone()).or_insert(0) += 1;
        state.window.push_back((now, cost));
        prune_window(&mut state.window, now);

        cost
    }

    /// Detached snapshot of the aggregates.
    pub fn snapshot(&self) -> CostSnapshot {
        let now = Timestamp::now();
        let mut state = self.state.lock().expect("cost state lock poisoned");
        prune_window(&mut state.window, now);

        CostSnapshot {
            total_cost: state.total_cost,
            last_min_cost: state.window.iter().map(|(_, cost)| cost).sum(),
            calls_by_model: state.calls_by_model.clone(),
        }
    }
}

fn prune_window(window: &mut VecDeque<(Timestamp, f64)>, now: Timestamp) {
    let cutoff = now - 60.seconds();
    while window.front().is_some_and(|(at, _)| *at < cutoff) {
        window.pop_front();
    }
}
