//! Built-in capture rules and sampler membership.
//!
//! Out-of-the-box coverage for the stock node classes. These tables are the
//! lowest registry layer; extension packs and user documents overlay them
//! per (class, field) pair without discarding unrelated entries.

use indexmap::IndexMap;
use serde_json::json;

use unimeta_core::rules::{
    CaptureRule, CaptureRuleSet, FormatterKind, NodeClassRules, PredicateKind, SamplerRole,
    SamplerRoleMap, SamplerTable,
};
use unimeta_core::MetaField;

fn class(rules: Vec<(MetaField, CaptureRule)>) -> NodeClassRules {
    rules.into_iter().collect()
}

fn roles(pairs: &[(SamplerRole, &str)]) -> SamplerRoleMap {
    pairs
        .iter()
        .map(|(role, input)| (*role, (*input).to_string()))
        .collect()
}

/// The built-in capture rule table.
pub fn capture_rules() -> CaptureRuleSet {
    use FormatterKind::*;
    use MetaField as F;
    use PredicateKind::*;

    let mut table: CaptureRuleSet = IndexMap::new();

    table.insert(
        "CheckpointLoaderSimple".into(),
        class(vec![
            (F::ModelName, CaptureRule::field("ckpt_name")),
            (
                F::ModelHash,
                CaptureRule::field("ckpt_name").with_format(CalcModelHash),
            ),
        ]),
    );
    table.insert(
        "CLIPSetLastLayer".into(),
        class(vec![(
            F::ClipSkip,
            CaptureRule::field("stop_at_clip_layer").with_format(ConvertSkipClip),
        )]),
    );
    table.insert(
        "VAELoader".into(),
        class(vec![
            (F::VaeName, CaptureRule::field("vae_name")),
            (
                F::VaeHash,
                CaptureRule::field("vae_name").with_format(CalcVaeHash),
            ),
        ]),
    );

    // CLIP loaders expose one or more clip_name* inputs.
    for loader in [
        "CLIPLoader",
        "DualCLIPLoader",
        "TripleCLIPLoader",
        "QuadrupleCLIPLoader",
        "CLIPLoaderGGUF",
        "DualCLIPLoaderGGUF",
    ] {
        table.insert(
            loader.into(),
            class(vec![(F::ClipModelName, CaptureRule::prefix("clip_name"))]),
        );
    }

    table.insert(
        "EmptyLatentImage".into(),
        class(vec![
            (F::ImageWidth, CaptureRule::field("width")),
            (F::ImageHeight, CaptureRule::field("height")),
        ]),
    );
    table.insert(
        "CLIPTextEncode".into(),
        class(vec![
            (
                F::PositivePrompt,
                CaptureRule::field("text").with_validate(IsPositivePrompt),
            ),
            (
                F::NegativePrompt,
                CaptureRule::field("text").with_validate(IsNegativePrompt),
            ),
            (
                F::EmbeddingName,
                CaptureRule::field("text").with_format(ExtractEmbeddingNames),
            ),
            (
                F::EmbeddingHash,
                CaptureRule::field("text").with_format(ExtractEmbeddingHashes),
            ),
        ]),
    );

    table.insert(
        "KSampler".into(),
        class(vec![
            (F::Seed, CaptureRule::field("seed")),
            (F::Steps, CaptureRule::field("steps")),
            (F::Cfg, CaptureRule::field("cfg")),
            (F::SamplerName, CaptureRule::field("sampler_name")),
            (F::Scheduler, CaptureRule::field("scheduler")),
            (F::Denoise, CaptureRule::field("denoise")),
        ]),
    );
    table.insert(
        "KSamplerAdvanced".into(),
        class(vec![
            (F::Seed, CaptureRule::field("noise_seed")),
            (F::Steps, CaptureRule::field("steps")),
            (F::Cfg, CaptureRule::field("cfg")),
            (F::SamplerName, CaptureRule::field("sampler_name")),
            (F::Scheduler, CaptureRule::field("scheduler")),
            (F::StartStep, CaptureRule::field("start_at_step")),
            (F::EndStep, CaptureRule::field("end_at_step")),
        ]),
    );
    table.insert(
        "SamplerCustomAdvanced".into(),
        class(vec![
            (F::Seed, CaptureRule::field("noise_seed")),
            (F::Steps, CaptureRule::field("steps")),
            (F::Cfg, CaptureRule::field("cfg")),
            (F::SamplerName, CaptureRule::field("sampler_name")),
            (F::Scheduler, CaptureRule::field("scheduler")),
        ]),
    );
    table.insert(
        "LatentUpscale".into(),
        class(vec![
            (F::ImageWidth, CaptureRule::field("width")),
            (F::ImageHeight, CaptureRule::field("height")),
        ]),
    );
    table.insert(
        "LoraLoader".into(),
        class(vec![
            (F::LoraModelName, CaptureRule::field("lora_name")),
            (
                F::LoraModelHash,
                CaptureRule::field("lora_name").with_format(CalcLoraHash),
            ),
            (F::LoraStrengthModel, CaptureRule::field("strength_model")),
            (F::LoraStrengthClip, CaptureRule::field("strength_clip")),
        ]),
    );
    table.insert(
        "LoraLoaderModelOnly".into(),
        class(vec![
            (F::LoraModelName, CaptureRule::field("lora_name")),
            (
                F::LoraModelHash,
                CaptureRule::field("lora_name").with_format(CalcLoraHash),
            ),
            (F::LoraStrengthModel, CaptureRule::field("strength_model")),
            (F::LoraStrengthClip, CaptureRule::literal(json!(0))),
        ]),
    );
    table.insert(
        "UNETLoader".into(),
        class(vec![
            (F::ModelName, CaptureRule::field("unet_name")),
            (
                F::ModelHash,
                CaptureRule::field("unet_name").with_format(CalcUnetHash),
            ),
            (F::WeightDtype, CaptureRule::field("weight_dtype")),
        ]),
    );
    table.insert(
        "RandomNoise".into(),
        class(vec![(F::Seed, CaptureRule::field("noise_seed"))]),
    );
    table.insert(
        "KSamplerSelect".into(),
        class(vec![(F::SamplerName, CaptureRule::field("sampler_name"))]),
    );
    table.insert(
        "CLIPTextEncodeFlux".into(),
        class(vec![
            (
                F::T5Prompt,
                CaptureRule::field("t5xxl").with_validate(IsPositivePrompt),
            ),
            (
                F::ClipPrompt,
                CaptureRule::field("clip_l").with_validate(IsPositivePrompt),
            ),
            (F::Guidance, CaptureRule::field("guidance")),
        ]),
    );
    table.insert(
        "FluxGuidance".into(),
        class(vec![(F::Guidance, CaptureRule::field("guidance"))]),
    );
    table.insert(
        "BasicScheduler".into(),
        class(vec![
            (F::Steps, CaptureRule::field("steps")),
            (F::Scheduler, CaptureRule::field("scheduler")),
            (F::Denoise, CaptureRule::field("denoise")),
        ]),
    );
    table.insert(
        "ModelSamplingFlux".into(),
        class(vec![
            (F::MaxShift, CaptureRule::field("max_shift")),
            (F::BaseShift, CaptureRule::field("base_shift")),
        ]),
    );
    table.insert(
        "ModelSamplingSD3".into(),
        class(vec![(F::Shift, CaptureRule::field("shift"))]),
    );
    table.insert(
        "TextEncodeQwenImageEdit".into(),
        class(vec![
            (
                F::PositivePrompt,
                CaptureRule::field("prompt").with_validate(IsPositivePrompt),
            ),
            (
                F::NegativePrompt,
                CaptureRule::field("prompt").with_validate(IsNegativePrompt),
            ),
        ]),
    );

    table
}

/// The built-in sampler membership table: class → conditioning role inputs.
pub fn sampler_table() -> SamplerTable {
    use SamplerRole::*;

    let standard = [
        "KSampler",
        "KSamplerAdvanced",
        "SamplerCustom",
        "KSampler //Inspire",
        "KSamplerAdvanced //Inspire",
        "KSampler (WAS)",
        "KSampler Cycle",
        "KSamplerAdvanced (WLSH)",
        "KSamplerWithNAG",
        "SamplerCustomWithNAG",
        "UltraSharkSampler",
    ];

    let mut table: SamplerTable = IndexMap::new();
    for name in standard {
        table.insert(
            name.into(),
            roles(&[
                (Positive, "positive"),
                (Negative, "negative"),
                (LatentImage, "latent_image"),
            ]),
        );
    }
    // Guider-style samplers carry conditioning through a single input.
    table.insert(
        "SamplerCustomAdvanced".into(),
        roles(&[(Positive, "guider"), (LatentImage, "latent_image")]),
    );
    for searge in ["SeargeSDXLSampler", "SeargeSDXLImage2ImageSampler"] {
        table.insert(
            searge.into(),
            roles(&[(Positive, "base_positive"), (Negative, "base_negative")]),
        );
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_loader_pairs_name_and_hash() {
        let table = capture_rules();
        let rules = table.get("CheckpointLoaderSimple").unwrap();
        assert!(rules.contains_key(&MetaField::ModelName));
        assert_eq!(
            rules.get(&MetaField::ModelHash).unwrap().format,
            Some(FormatterKind::CalcModelHash)
        );
    }

    #[test]
    fn every_sampler_role_map_names_a_positive() {
        for (name, map) in sampler_table() {
            assert!(
                map.contains_key(&SamplerRole::Positive),
                "sampler '{name}' has no positive role"
            );
        }
    }

    #[test]
    fn prompt_rules_are_gated_by_predicates() {
        let table = capture_rules();
        let encode = table.get("CLIPTextEncode").unwrap();
        assert_eq!(
            encode.get(&MetaField::PositivePrompt).unwrap().validate,
            Some(PredicateKind::IsPositivePrompt)
        );
        assert_eq!(
            encode.get(&MetaField::NegativePrompt).unwrap().validate,
            Some(PredicateKind::IsNegativePrompt)
        );
    }
}
