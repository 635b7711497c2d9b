//! The lightweight sampler stub used by integration tests.
//!
//! Exposed only when the enable-test-nodes toggle is set. Its prompt inputs
//! opt in to inline LoRA scanning and its hash inputs arrive pre-computed.

use indexmap::IndexMap;

use unimeta_core::rules::{CaptureRule, FormatterKind, SamplerRole};
use unimeta_core::MetaField;

use super::ExtensionPack;

pub fn pack() -> ExtensionPack {
    use MetaField as F;

    let mut rules = IndexMap::new();
    rules.insert(
        F::PositivePrompt,
        CaptureRule::field("positive_prompt").inline_lora(),
    );
    rules.insert(
        F::NegativePrompt,
        CaptureRule::field("negative_prompt").inline_lora(),
    );
    rules.insert(F::Seed, CaptureRule::field("seed"));
    rules.insert(F::Steps, CaptureRule::field("steps"));
    rules.insert(F::Cfg, CaptureRule::field("cfg"));
    rules.insert(F::SamplerName, CaptureRule::field("sampler_name"));
    rules.insert(F::Scheduler, CaptureRule::field("scheduler"));
    rules.insert(F::Guidance, CaptureRule::field("guidance"));
    rules.insert(F::ModelName, CaptureRule::field("model_name"));
    rules.insert(
        F::ModelHash,
        CaptureRule::field("model_hash").with_format(FormatterKind::Passthrough),
    );
    rules.insert(F::VaeName, CaptureRule::field("vae_name"));
    rules.insert(
        F::VaeHash,
        CaptureRule::field("vae_hash").with_format(FormatterKind::Passthrough),
    );
    rules.insert(F::ClipModelName, CaptureRule::prefix("clip_name"));
    rules.insert(F::ImageWidth, CaptureRule::field("width"));
    rules.insert(F::ImageHeight, CaptureRule::field("height"));

    let mut captures = IndexMap::new();
    captures.insert("MetadataTestSampler".to_string(), rules);

    let mut samplers = IndexMap::new();
    let mut roles = IndexMap::new();
    roles.insert(SamplerRole::Positive, "positive".to_string());
    roles.insert(SamplerRole::Negative, "negative".to_string());
    samplers.insert("MetadataTestSampler".to_string(), roles);

    ExtensionPack {
        name: "test_nodes",
        captures,
        samplers,
    }
}
