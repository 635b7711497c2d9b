//! Bundled extension rule packs.
//!
//! Each pack mirrors one third-party node family and contributes capture
//! rules and sampler roles on top of the defaults. Packs whose name matches
//! `*_examples` or starts with `__` are sample material and are never
//! merged.

mod efficiency;
mod pclazy;
mod rgthree;
mod test_nodes;

use unimeta_core::rules::{CaptureRuleSet, SamplerTable};
use unimeta_core::Settings;

/// One extension pack's contribution.
pub struct ExtensionPack {
    pub name: &'static str,
    pub captures: CaptureRuleSet,
    pub samplers: SamplerTable,
}

/// True when a pack name is excluded from merging.
pub fn is_skipped(name: &str) -> bool {
    name.ends_with("_examples") || name.starts_with("__")
}

/// All packs eligible under the current settings, in merge order.
pub fn packs(settings: &Settings) -> Vec<ExtensionPack> {
    let mut list = vec![
        efficiency::pack(),
        pclazy::pack(),
        rgthree::pack(),
    ];
    if settings.enable_test_nodes {
        list.push(test_nodes::pack());
    }
    list.retain(|pack| !is_skipped(pack.name));
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_rule_matches_naming_convention() {
        assert!(is_skipped("generated_user_rules_examples"));
        assert!(is_skipped("__init"));
        assert!(!is_skipped("efficiency_nodes"));
    }

    #[test]
    fn test_pack_is_gated() {
        let without = packs(&Settings::default());
        assert!(without.iter().all(|p| p.name != "test_nodes"));

        let settings = Settings {
            enable_test_nodes: true,
            ..Settings::default()
        };
        assert!(packs(&settings).iter().any(|p| p.name == "test_nodes"));
    }
}
