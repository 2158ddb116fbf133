//! The built-in model catalog.
//!
//! Prices are dollars per million tokens and, together with context lengths,
//! are point-in-time snapshots of the public price sheets. Treat them as
//! data: correctness of the engine never depends on a specific number.

use config::ProviderId;
use jiff::civil::time;

use super::{
    CatalogError, ModelClass, ModelCost, ModelEntry, ModelFeatures, ModelRegistry, Price,
};

fn flat(input: f64, output: f64) -> ModelCost {
    ModelCost {
        input: Some(Price::Flat(input)),
        cached: None,
        output: Some(Price::Flat(output)),
        per_image: None,
    }
}

fn flat_cached(input: f64, cached: f64, output: f64) -> ModelCost {
    ModelCost {
        input: Some(Price::Flat(input)),
        cached: Some(Price::Flat(cached)),
        output: Some(Price::Flat(output)),
        per_image: None,
    }
}

fn text_features(context: u64, max_output: u64) -> ModelFeatures {
    ModelFeatures {
        context_length: context,
        max_output_tokens: Some(max_output),
        ..ModelFeatures::default()
    }
}

fn vision_features(context: u64, max_output: u64) -> ModelFeatures {
    ModelFeatures {
        context_length: context,
        max_output_tokens: Some(max_output),
        input_modalities: vec![super::Modality::Text, super::Modality::Image],
        ..ModelFeatures::default()
    }
}

pub(super) fn builtin() -> Result<ModelRegistry, CatalogError> {
    // DeepSeek discounts 16:30-00:30 UTC; peak is the complementary window.
    let deepseek_tod = |peak: f64, off_peak: f64| Price::TimeOfDay {
        peak,
        off_peak,
        peak_start: time(0, 30, 0, 0),
        peak_end: time(16, 30, 0, 0),
    };

    ModelRegistry::builder()
        // --- OpenAI ---------------------------------------------------
        .model(
            ModelEntry::new("gpt-5", ProviderId::OpenAi)
                .alias("gpt5")
                .cost(flat_cached(1.25, 0.125, 10.0))
                .features(vision_features(400_000, 128_000))
                .score(90)
                .openrouter_id("openai/gpt-5"),
        )
        .model(
            ModelEntry::new("gpt-5-mini", ProviderId::OpenAi)
                .cost(flat_cached(0.25, 0.025, 2.0))
                .features(vision_features(400_000, 128_000))
                .score(70)
                .openrouter_id("openai/gpt-5-mini"),
        )
        .model(
            ModelEntry::new("gpt-5-nano", ProviderId::OpenAi)
                .cost(flat_cached(0.05, 0.005, 0.4))
                .features(vision_features(400_000, 128_000))
                .score(50),
        )
        .model(
            ModelEntry::new("gpt-4.1", ProviderId::OpenAi)
                .cost(flat_cached(2.0, 0.5, 8.0))
                .features(vision_features(1_047_576, 32_768))
                .openrouter_id("openai/gpt-4.1"),
        )
        .model(
            ModelEntry::new("gpt-4o", ProviderId::OpenAi)
                .alias("gpt-4o-latest")
                .cost(flat_cached(2.5, 1.25, 10.0))
                .features(vision_features(128_000, 16_384))
                .openrouter_id("openai/gpt-4o"),
        )
        .model(
            ModelEntry::new("gpt-4o-search-preview", ProviderId::OpenAi)
                .cost(flat(2.5, 10.0))
                .features(text_features(128_000, 16_384)),
        )
        .model(
            ModelEntry::new("o3", ProviderId::OpenAi)
                .cost(flat_cached(2.0, 0.5, 8.0))
                .features(text_features(200_000, 100_000))
                .score(85)
                .openrouter_id("openai/o3"),
        )
        .model(
            ModelEntry::new("o4-mini", ProviderId::OpenAi)
                .cost(flat_cached(1.1, 0.275, 4.4))
                .features(text_features(200_000, 100_000))
                .score(60),
        )
        .model(
            ModelEntry::new("codex-mini-latest", ProviderId::OpenAi)
                .cost(flat_cached(1.5, 0.375, 6.0))
                .features(text_features(200_000, 100_000)),
        )
        .model(
            ModelEntry::new("computer-use-preview", ProviderId::OpenAi)
                .cost(flat(3.0, 12.0))
                .features(vision_features(200_000, 8_192)),
        )
        .model(ModelEntry::new("gpt-image-1", ProviderId::OpenAi).cost(ModelCost {
            input: Some(Price::Flat(5.0)),
            cached: None,
            output: None,
            per_image: Some(0.042),
        }))
        .model(
            ModelEntry::new("text-embedding-3-small", ProviderId::OpenAi).cost(ModelCost {
                input: Some(Price::Flat(0.02)),
                cached: None,
                output: None,
                per_image: None,
            }),
        )
        // --- Anthropic ------------------------------------------------
        .model(
            ModelEntry::new("claude-opus-4-1", ProviderId::Anthropic)
                .alias("claude-opus-4")
                .cost(flat_cached(15.0, 1.5, 75.0))
                .features(vision_features(200_000, 32_000))
                .score(95)
                .openrouter_id("anthropic/claude-opus-4.1"),
        )
        .model(
            ModelEntry::new("claude-sonnet-4-0", ProviderId::Anthropic)
                .alias("claude-sonnet-4")
                .cost(flat_cached(3.0, 0.3, 15.0))
                .features(vision_features(200_000, 64_000))
                .score(88)
                .openrouter_id("anthropic/claude-sonnet-4"),
        )
        .model(
            ModelEntry::new("claude-3-5-haiku-latest", ProviderId::Anthropic)
                .alias("claude-3-5-haiku")
                .cost(flat_cached(0.8, 0.08, 4.0))
                .features(vision_features(200_000, 8_192))
                .score(55),
        )
        .model(
            // Served through the local CLI; cost is reported by the
            // subprocess itself, so no token pricing here.
            ModelEntry::new("claude-code", ProviderId::ClaudeCli).features(ModelFeatures {
                context_length: 200_000,
                max_output_tokens: Some(32_000),
                streaming: false,
                ..ModelFeatures::default()
            }),
        )
        // --- Google ---------------------------------------------------
        .model(
            ModelEntry::new("gemini-2.5-pro", ProviderId::Google)
                .cost(ModelCost {
                    input: Some(Price::Tiered {
                        threshold_tokens: 200_000,
                        below: 1.25,
                        above: 2.5,
                    }),
                    cached: None,
                    output: Some(Price::Tiered {
                        threshold_tokens: 200_000,
                        below: 10.0,
                        above: 15.0,
                    }),
                    per_image: None,
                })
                .features(vision_features(1_048_576, 65_536))
                .score(86)
                .openrouter_id("google/gemini-2.5-pro"),
        )
        .model(
            ModelEntry::new("gemini-2.5-flash", ProviderId::Google)
                .cost(flat(0.3, 2.5))
                .features(vision_features(1_048_576, 65_536))
                .score(65),
        )
        .model(
            ModelEntry::new("gemini-2.5-flash-lite", ProviderId::Google)
                .cost(flat(0.1, 0.4))
                .features(vision_features(1_048_576, 65_536)),
        )
        .model(
            ModelEntry::new("imagen-3", ProviderId::Google).cost(ModelCost {
                input: None,
                cached: None,
                output: None,
                per_image: Some(0.03),
            }),
        )
        // --- xAI ------------------------------------------------------
        .model(
            ModelEntry::new("grok-4", ProviderId::Xai)
                .alias("grok-4-latest")
                .cost(flat_cached(3.0, 0.75, 15.0))
                .features(text_features(256_000, 64_000))
                .score(80)
                .openrouter_id("x-ai/grok-4"),
        )
        .model(
            ModelEntry::new("grok-3-mini", ProviderId::Xai)
                .cost(flat(0.3, 0.5))
                .features(text_features(131_072, 16_384)),
        )
        // --- DeepSeek -------------------------------------------------
        .model(
            ModelEntry::new("deepseek-chat", ProviderId::DeepSeek)
                .cost(ModelCost {
                    input: Some(deepseek_tod(0.27, 0.135)),
                    cached: Some(deepseek_tod(0.07, 0.035)),
                    output: Some(deepseek_tod(1.1, 0.55)),
                    per_image: None,
                })
                .features(text_features(65_536, 8_192))
                .openrouter_id("deepseek/deepseek-chat"),
        )
        .model(
            ModelEntry::new("deepseek-reasoner", ProviderId::DeepSeek)
                .cost(ModelCost {
                    input: Some(deepseek_tod(0.55, 0.135)),
                    cached: Some(deepseek_tod(0.14, 0.035)),
                    output: Some(deepseek_tod(2.19, 0.55)),
                    per_image: None,
                })
                .features(ModelFeatures {
                    context_length: 65_536,
                    max_output_tokens: Some(65_536),
                    // Tool use goes through the sentinel protocol instead.
                    tool_use: false,
                    ..ModelFeatures::default()
                })
                .score(60),
        )
        // --- OpenRouter natives --------------------------------------
        .model(
            ModelEntry::new("meta-llama/llama-3.3-70b-instruct", ProviderId::OpenRouter)
                .cost(flat(0.12, 0.3))
                .features(text_features(131_072, 16_384)),
        )
        // --- Test backend --------------------------------------------
        .model(
            ModelEntry::new("test-standard", ProviderId::Test)
                .cost(flat(1.0, 2.0))
                .features(text_features(128_000, 8_192)),
        )
        .model(
            ModelEntry::new("test-mini", ProviderId::Test)
                .cost(flat(0.1, 0.2))
                .features(text_features(128_000, 8_192)),
        )
        .model(ModelEntry::new("test-rate-limit", ProviderId::Test).cost(flat(1.0, 2.0)))
        .model(ModelEntry::new("test-error", ProviderId::Test).cost(flat(1.0, 2.0)))
        .model(ModelEntry::new("test-thinking", ProviderId::Test).cost(flat(1.0, 2.0)))
        // --- Classes --------------------------------------------------
        .class(
            ModelClass::Standard,
            ["gpt-5", "claude-sonnet-4-0", "gemini-2.5-pro", "grok-4"],
            false,
        )
        .class(
            ModelClass::Mini,
            ["gpt-5-mini", "gemini-2.5-flash", "claude-3-5-haiku-latest", "grok-3-mini"],
            false,
        )
        .class(ModelClass::Reasoning, ["o3", "o4-mini", "deepseek-reasoner", "grok-4"], false)
        .class(
            ModelClass::Monologue,
            ["deepseek-reasoner", "o4-mini", "claude-3-5-haiku-latest"],
            false,
        )
        .class(
            ModelClass::Code,
            ["claude-code", "claude-sonnet-4-0", "codex-mini-latest", "gpt-5"],
            false,
        )
        .class(
            ModelClass::Writing,
            ["claude-opus-4-1", "gpt-5", "gemini-2.5-pro"],
            true,
        )
        .class(
            ModelClass::Summary,
            ["gemini-2.5-flash", "gpt-5-nano", "claude-3-5-haiku-latest"],
            false,
        )
        .class(
            ModelClass::Vision,
            ["gpt-4o", "claude-sonnet-4-0", "gemini-2.5-pro"],
            false,
        )
        .class(ModelClass::VisionMini, ["gemini-2.5-flash-lite", "gpt-5-nano"], false)
        .class(ModelClass::Search, ["gpt-4o-search-preview", "gemini-2.5-flash"], false)
        .class(ModelClass::ImageGeneration, ["gpt-image-1", "imagen-3"], false)
        .class(ModelClass::Embedding, ["text-embedding-3-small"], false)
        .build()
}
