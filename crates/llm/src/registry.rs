//! The model registry: a read-mostly catalog of concrete models, their
//! pricing, features and class membership.
//!
//! The registry is immutable after construction. Prices and context lengths
//! in the built-in catalog are point-in-time data, not API contract.

mod catalog;

use std::collections::HashMap;

use config::ProviderId;
use indexmap::IndexMap;
use jiff::Timestamp;
use jiff::civil::Time;
use jiff::tz::TimeZone;
use rand::Rng;
use strum::{Display, EnumIter, EnumString};

/// A capability bucket of interchangeable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ModelClass {
    Standard,
    Mini,
    Reasoning,
    Monologue,
    Code,
    Writing,
    Summary,
    Vision,
    VisionMini,
    Search,
    ImageGeneration,
    Embedding,
}

/// Price of one cost component, in dollars per million tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum Price {
    /// A single flat rate.
    Flat(f64),

    /// Two-segment price: the first `threshold_tokens` at `below`, the
    /// remainder at `above`.
    Tiered {
        threshold_tokens: u64,
        below: f64,
        above: f64,
    },

    /// Rate depends on the UTC clock: `peak` inside `[peak_start, peak_end)`
    /// (the window may wrap midnight), `off_peak` outside it.
    TimeOfDay {
        peak: f64,
        off_peak: f64,
        peak_start: Time,
        peak_end: Time,
    },
}

impl Price {
    /// Dollar cost of `tokens` under this price at the given instant.
    pub fn cost_for(&self, tokens: u64, at: Timestamp) -> f64 {
        match self {
            Self::Flat(per_million) => tokens as f64 * per_million / 1e6,

            Self::Tiered {
                threshold_tokens,
                below,
                above,
            } => {
                let below_tokens = tokens.min(*threshold_tokens);
                let above_tokens = tokens.saturating_sub(*threshold_tokens);
                (below_tokens as f64 * below + above_tokens as f64 * above) / 1e6
            }

            Self::TimeOfDay {
                peak,
                off_peak,
                peak_start,
                peak_end,
            } => {
                let clock = at.to_zoned(TimeZone::UTC).time();
                let rate = if in_window(clock, *peak_start, *peak_end) {
                    *peak
                } else {
                    *off_peak
                };
                tokens as f64 * rate / 1e6
            }
        }
    }
}

/// `[start, end)` membership; windows may wrap midnight.
fn in_window(clock: Time, start: Time, end: Time) -> bool {
    if start <= end {
        clock >= start && clock < end
    } else {
        clock >= start || clock < end
    }
}

/// Pricing for a model, per cost component.
#[derive(Debug, Clone, Default)]
pub struct ModelCost {
    pub input: Option<Price>,
    pub cached: Option<Price>,
    pub output: Option<Price>,
    /// Dollars per generated image, for image-generation models.
    pub per_image: Option<f64>,
}

/// Input/output modalities a model understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
    Audio,
}

/// Capabilities of a model.
#[derive(Debug, Clone)]
pub struct ModelFeatures {
    pub context_length: u64,
    pub max_output_tokens: Option<u64>,
    pub input_modalities: Vec<Modality>,
    pub output_modalities: Vec<Modality>,
    pub tool_use: bool,
    pub streaming: bool,
    pub json_output: bool,
}

impl Default for ModelFeatures {
    fn default() -> Self {
        Self {
            context_length: 128_000,
            max_output_tokens: None,
            input_modalities: vec![Modality::Text],
            output_modalities: vec![Modality::Text],
            tool_use: true,
            streaming: true,
            json_output: false,
        }
    }
}

/// One concrete model in the catalog.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    /// Unique id, also the routing key.
    pub id: String,
    /// Alternative names; globally unique together with ids.
    pub aliases: Vec<String>,
    /// Backend serving this model.
    pub provider: ProviderId,
    pub cost: ModelCost,
    pub features: ModelFeatures,
    /// Relative quality weight used by randomized class selection.
    pub score: Option<u32>,
    /// Id under which OpenRouter serves this model, enabling key fallback.
    pub openrouter_id: Option<String>,
}

impl ModelEntry {
    /// A text model with default features and no pricing.
    pub fn new(id: impl Into<String>, provider: ProviderId) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
            provider,
            cost: ModelCost::default(),
            features: ModelFeatures::default(),
            score: None,
            openrouter_id: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn cost(mut self, cost: ModelCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn features(mut self, features: ModelFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn score(mut self, score: u32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn openrouter_id(mut self, id: impl Into<String>) -> Self {
        self.openrouter_id = Some(id.into());
        self
    }
}

struct ClassEntry {
    members: Vec<String>,
    random: bool,
}

/// Immutable model catalog with id/alias lookup and ordered class listing.
pub struct ModelRegistry {
    entries: IndexMap<String, ModelEntry>,
    alias_index: HashMap<String, String>,
    classes: IndexMap<ModelClass, ClassEntry>,
}

/// Construction-time catalog error (duplicate id/alias, unknown member).
#[derive(Debug, thiserror::Error)]
#[error("invalid model catalog: {0}")]
pub struct CatalogError(String);

impl ModelRegistry {
    /// The built-in catalog covering every supported backend.
    pub fn builtin() -> Self {
        catalog::builtin().expect("built-in catalog is consistent")
    }

    /// An empty registry for programmatic construction.
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder {
            entries: Vec::new(),
            classes: Vec::new(),
        }
    }

    /// Look up a model by id or alias.
    pub fn find(&self, id_or_alias: &str) -> Option<&ModelEntry> {
        if let Some(entry) = self.entries.get(id_or_alias) {
            return Some(entry);
        }

        self.alias_index.get(id_or_alias).and_then(|id| self.entries.get(id))
    }

    /// Member ids of a class, in registry order; shuffled (weighted by
    /// scores) per call when the class is randomized.
    pub fn class_members(&self, class: ModelClass) -> Vec<String> {
        let Some(entry) = self.classes.get(&class) else {
            return Vec::new();
        };

        if !entry.random {
            return entry.members.clone();
        }

        let mut weighted: Vec<(String, u32)> = entry
            .members
            .iter()
            .map(|id| {
                let weight = self.find(id).and_then(|m| m.score).unwrap_or(1).max(1);
                (id.clone(), weight)
            })
            .collect();

        let mut rng = rand::rng();
        let mut shuffled = Vec::with_capacity(weighted.len());

        // Weighted sampling without replacement: higher-scored models tend
        // to come out earlier but every order remains possible.
        while !weighted.is_empty() {
            let total: u64 = weighted.iter().map(|(_, w)| u64::from(*w)).sum();
            let mut pick = rng.random_range(0..total);
            let mut chosen = 0;

            for (index, (_, weight)) in weighted.iter().enumerate() {
                if pick < u64::from(*weight) {
                    chosen = index;
                    break;
                }
                pick -= u64::from(*weight);
            }

            shuffled.push(weighted.remove(chosen).0);
        }

        shuffled
    }

    /// Whether the model id belongs to the class (no shuffle, no clone).
    pub fn in_class(&self, class: ModelClass, id: &str) -> bool {
        self.classes
            .get(&class)
            .is_some_and(|entry| entry.members.iter().any(|member| member == id))
    }

    /// Whether the name denotes a registered class.
    pub fn parse_class(name: &str) -> Option<ModelClass> {
        name.parse().ok()
    }
}

/// Builder enforcing the catalog invariants at construction time.
pub struct ModelRegistryBuilder {
    entries: Vec<ModelEntry>,
    classes: Vec<(ModelClass, Vec<String>, bool)>,
}

impl ModelRegistryBuilder {
    pub fn model(mut self, entry: ModelEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn class<I, S>(mut self, class: ModelClass, members: I, random: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes
            .push((class, members.into_iter().map(Into::into).collect(), random));
        self
    }

    /// Validate global id/alias uniqueness and member references.
    pub fn build(self) -> std::result::Result<ModelRegistry, CatalogError> {
        let mut entries = IndexMap::new();
        let mut alias_index = HashMap::new();

        for entry in self.entries {
            if entries.contains_key(&entry.id) || alias_index.contains_key(&entry.id) {
                return Err(CatalogError(format!("duplicate model id '{}'", entry.id)));
            }

            for alias in &entry.aliases {
                if entries.contains_key(alias) || alias_index.contains_key(alias) {
                    return Err(CatalogError(format!("duplicate alias '{alias}'")));
                }
                alias_index.insert(alias.clone(), entry.id.clone());
            }

            entries.insert(entry.id.clone(), entry);
        }

        let mut classes = IndexMap::new();

        for (class, members, random) in self.classes {
            for member in &members {
                if !entries.contains_key(member) {
                    return Err(CatalogError(format!(
                        "class {class} references unknown model '{member}'"
                    )));
                }
            }
            classes.insert(class, ClassEntry { members, random });
        }

        Ok(ModelRegistry {
            entries,
            alias_index,
            classes,
        })
    }
}
