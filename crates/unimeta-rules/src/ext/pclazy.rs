//! Rules for the prompt-control lazy LoRA loaders.
//!
//! These loaders carry their LoRA set either as a structured list or inline
//! in the prompt text; `collect_loras_from_loader` inspects structure first
//! and keeps the per-slot quadruple aligned. Clip strengths are reported as
//! a separate list and must surface as distinct `Lora_N Strength clip`
//! values.

use indexmap::IndexMap;

use unimeta_core::rules::{CaptureRule, SelectorKind};
use unimeta_core::MetaField;

use super::ExtensionPack;

pub fn pack() -> ExtensionPack {
    use MetaField as F;

    let mut captures = IndexMap::new();
    for class_name in ["PCLazyLoraLoader", "PCLazyLoraLoaderAdvanced"] {
        let mut rules = IndexMap::new();
        for field in [
            F::LoraModelName,
            F::LoraModelHash,
            F::LoraStrengthModel,
            F::LoraStrengthClip,
        ] {
            rules.insert(
                field,
                CaptureRule::selector(SelectorKind::CollectLorasFromLoader),
            );
        }
        captures.insert(class_name.to_string(), rules);
    }

    ExtensionPack {
        name: "pclazy_lora_loader",
        captures,
        samplers: IndexMap::new(),
    }
}
