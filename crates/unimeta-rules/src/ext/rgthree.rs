//! Rules for the rgthree power loader.
//!
//! The power loader's `lora_*` inputs are nested objects
//! `{on, lora, strength}`; disabled slots are dropped by the collector.

use indexmap::IndexMap;

use unimeta_core::rules::{CaptureRule, SelectorKind};
use unimeta_core::MetaField;

use super::ExtensionPack;

pub fn pack() -> ExtensionPack {
    use MetaField as F;

    let mut captures = IndexMap::new();
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
    captures.insert("Power Lora Loader (rgthree)".to_string(), rules);

    ExtensionPack {
        name: "rgthree",
        captures,
        samplers: IndexMap::new(),
    }
}
