//! Rules for the "efficiency" loader/sampler node family.
//!
//! The stack loader exposes indexed inputs `lora_name_1..n` bounded by a
//! `lora_count` counter, with `lora_wt_*` strengths in simple mode.

use indexmap::IndexMap;

use unimeta_core::rules::{
    CaptureRule, FormatterKind, SamplerRole, SelectorKind,
};
use unimeta_core::MetaField;

use super::ExtensionPack;

fn stack(prefix: &str) -> SelectorKind {
    SelectorKind::SelectStackByPrefix {
        prefix: prefix.to_string(),
        counter_key: Some("lora_count".to_string()),
        filter_none: true,
    }
}

pub fn pack() -> ExtensionPack {
    use MetaField as F;

    let mut captures = IndexMap::new();

    let mut loader = IndexMap::new();
    loader.insert(F::ModelName, CaptureRule::field("ckpt_name"));
    loader.insert(
        F::ModelHash,
        CaptureRule::field("ckpt_name").with_format(FormatterKind::CalcModelHash),
    );
    loader.insert(F::VaeName, CaptureRule::field("vae_name"));
    loader.insert(
        F::VaeHash,
        CaptureRule::field("vae_name").with_format(FormatterKind::CalcVaeHash),
    );
    loader.insert(
        F::ClipSkip,
        CaptureRule::field("clip_skip").with_format(FormatterKind::ConvertSkipClip),
    );
    loader.insert(F::LoraModelName, CaptureRule::field("lora_name"));
    loader.insert(
        F::LoraModelHash,
        CaptureRule::field("lora_name").with_format(FormatterKind::CalcLoraHash),
    );
    loader.insert(F::LoraStrengthModel, CaptureRule::field("lora_model_strength"));
    loader.insert(F::LoraStrengthClip, CaptureRule::field("lora_clip_strength"));
    captures.insert("Efficient Loader".to_string(), loader);

    let mut stacker = IndexMap::new();
    stacker.insert(F::LoraModelName, CaptureRule::selector(stack("lora_name_")));
    stacker.insert(
        F::LoraModelHash,
        CaptureRule::selector(stack("lora_name_")).with_format(FormatterKind::CalcLoraHash),
    );
    stacker.insert(
        F::LoraStrengthModel,
        CaptureRule::selector(stack("lora_wt_")),
    );
    stacker.insert(
        F::LoraStrengthClip,
        CaptureRule::selector(stack("lora_wt_")),
    );
    captures.insert("LoRA Stacker".to_string(), stacker);

    let mut sampler = IndexMap::new();
    sampler.insert(F::Seed, CaptureRule::field("seed"));
    sampler.insert(F::Steps, CaptureRule::field("steps"));
    sampler.insert(F::Cfg, CaptureRule::field("cfg"));
    sampler.insert(F::SamplerName, CaptureRule::field("sampler_name"));
    sampler.insert(F::Scheduler, CaptureRule::field("scheduler"));
    sampler.insert(F::Denoise, CaptureRule::field("denoise"));
    captures.insert("KSampler (Efficient)".to_string(), sampler);

    let mut samplers = IndexMap::new();
    let mut roles = IndexMap::new();
    roles.insert(SamplerRole::Positive, "positive".to_string());
    roles.insert(SamplerRole::Negative, "negative".to_string());
    roles.insert(SamplerRole::LatentImage, "latent_image".to_string());
    samplers.insert("KSampler (Efficient)".to_string(), roles);

    ExtensionPack {
        name: "efficiency_nodes",
        captures,
        samplers,
    }
}
