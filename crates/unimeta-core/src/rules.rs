//! The capture-rule vocabulary.
//!
//! A [`CaptureRule`] declares how one [`MetaField`] is read from a node
//! class: which input(s) to read ([`ValueSource`]), an optional
//! post-processing [`FormatterKind`], an optional gating [`PredicateKind`],
//! and the inline-LoRA opt-in flag. All dispatch is by closed enum variant;
//! rules are plain values that serialize to the flat JSON object shape of
//! user rule documents:
//!
//! ```json
//! { "field_name": "ckpt_name", "format": "calc_model_hash" }
//! { "prefix": "clip_name" }
//! { "fields": ["lora_name_1", "lora_name_2"] }
//! { "selector": "select_stack_by_prefix", "prefix": "lora_name",
//!   "counter_key": "lora_count", "filter_none": true }
//! ```

use indexmap::IndexMap;
use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::meta::MetaField;

/// Where a rule reads its raw value(s) from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// Read the single input named here.
    Field(String),
    /// Enumerate all inputs whose name starts with the prefix followed by an
    /// integer suffix, in suffix order.
    Prefix(String),
    /// Enumerate a fixed ordered list of input names.
    Fields(Vec<String>),
    /// Invoke a named pure extraction procedure.
    Selector(SelectorKind),
    /// Emit a constant, independent of the node's inputs.
    Literal(Value),
}

/// The closed set of named extraction procedures.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectorKind {
    /// Scan a prompt text for `<lora:name:sm[:sc]>` tags.
    ParseInlineLoraTags,
    /// Split a combined sampler/scheduler value into its parts.
    SplitSchedulerCombo,
    /// Read all inputs named `<prefix><n>`, optionally truncated to the
    /// integer value of `counter_key`, optionally dropping `"None"` entries.
    SelectStackByPrefix {
        prefix: String,
        counter_key: Option<String>,
        filter_none: bool,
    },
    /// Inspect structured loader fields (`lora_stack`, `loras`,
    /// `loaded_loras`) before falling back to text parsing.
    CollectLorasFromLoader,
}

impl SelectorKind {
    pub fn name(&self) -> &'static str {
        match self {
            SelectorKind::ParseInlineLoraTags => "parse_inline_lora_tags",
            SelectorKind::SplitSchedulerCombo => "split_scheduler_combo",
            SelectorKind::SelectStackByPrefix { .. } => "select_stack_by_prefix",
            SelectorKind::CollectLorasFromLoader => "collect_loras_from_loader",
        }
    }
}

/// Post-processing applied to an extracted raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatterKind {
    /// Resolve as a checkpoint artifact and hash it.
    CalcModelHash,
    /// Resolve as a VAE artifact and hash it.
    CalcVaeHash,
    /// Resolve as a diffusion-model (UNet) artifact and hash it.
    CalcUnetHash,
    /// Resolve as a LoRA artifact and hash it.
    CalcLoraHash,
    /// Strip path and extension, leaving a display name.
    CleanModelName,
    /// Negate a stop-at-layer value into the conventional clip-skip form.
    ConvertSkipClip,
    /// Accept dict, tuple/list, or combined-string scheduler forms.
    ParseSchedulerCombo,
    /// Extract `embedding:NAME` tokens from a prompt text.
    ExtractEmbeddingNames,
    /// Extract `embedding:NAME` tokens and hash the resolved files.
    ExtractEmbeddingHashes,
    /// Pass the value through unchanged (pre-hashed stub inputs).
    Passthrough,
}

impl FormatterKind {
    pub fn name(&self) -> &'static str {
        match self {
            FormatterKind::CalcModelHash => "calc_model_hash",
            FormatterKind::CalcVaeHash => "calc_vae_hash",
            FormatterKind::CalcUnetHash => "calc_unet_hash",
            FormatterKind::CalcLoraHash => "calc_lora_hash",
            FormatterKind::CleanModelName => "clean_model_name",
            FormatterKind::ConvertSkipClip => "convert_skip_clip",
            FormatterKind::ParseSchedulerCombo => "parse_scheduler_combo",
            FormatterKind::ExtractEmbeddingNames => "extract_embedding_names",
            FormatterKind::ExtractEmbeddingHashes => "extract_embedding_hashes",
            FormatterKind::Passthrough => "passthrough",
        }
    }

    pub fn parse(name: &str) -> Option<FormatterKind> {
        Some(match name {
            "calc_model_hash" => FormatterKind::CalcModelHash,
            "calc_vae_hash" => FormatterKind::CalcVaeHash,
            "calc_unet_hash" => FormatterKind::CalcUnetHash,
            "calc_lora_hash" => FormatterKind::CalcLoraHash,
            "clean_model_name" => FormatterKind::CleanModelName,
            "convert_skip_clip" => FormatterKind::ConvertSkipClip,
            "parse_scheduler_combo" => FormatterKind::ParseSchedulerCombo,
            "extract_embedding_names" => FormatterKind::ExtractEmbeddingNames,
            "extract_embedding_hashes" => FormatterKind::ExtractEmbeddingHashes,
            "passthrough" => FormatterKind::Passthrough,
            _ => return None,
        })
    }

    /// True for the formatters that stream artifact bytes; the extractor
    /// guards these behind a path-likeness check.
    pub fn is_hash(&self) -> bool {
        matches!(
            self,
            FormatterKind::CalcModelHash
                | FormatterKind::CalcVaeHash
                | FormatterKind::CalcUnetHash
                | FormatterKind::CalcLoraHash
                | FormatterKind::ExtractEmbeddingHashes
        )
    }
}

/// Validation predicate gating a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateKind {
    /// Node feeds a sampler's positive conditioning input.
    IsPositivePrompt,
    /// Node feeds a sampler's negative conditioning input.
    IsNegativePrompt,
    /// Node has at least one downstream consumer.
    IsNodeConnected,
}

impl PredicateKind {
    pub fn name(&self) -> &'static str {
        match self {
            PredicateKind::IsPositivePrompt => "is_positive_prompt",
            PredicateKind::IsNegativePrompt => "is_negative_prompt",
            PredicateKind::IsNodeConnected => "is_node_connected",
        }
    }

    pub fn parse(name: &str) -> Option<PredicateKind> {
        Some(match name {
            "is_positive_prompt" => PredicateKind::IsPositivePrompt,
            "is_negative_prompt" => PredicateKind::IsNegativePrompt,
            "is_node_connected" => PredicateKind::IsNodeConnected,
            _ => return None,
        })
    }
}

/// One extraction mapping for a node class.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRule {
    pub source: ValueSource,
    pub format: Option<FormatterKind>,
    pub validate: Option<PredicateKind>,
    /// Opt-in marker: prompt texts captured through this rule may be scanned
    /// for inline LoRA tags.
    pub inline_lora_candidate: bool,
}

impl CaptureRule {
    pub fn field(name: impl Into<String>) -> Self {
        CaptureRule {
            source: ValueSource::Field(name.into()),
            format: None,
            validate: None,
            inline_lora_candidate: false,
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        CaptureRule {
            source: ValueSource::Prefix(prefix.into()),
            format: None,
            validate: None,
            inline_lora_candidate: false,
        }
    }

    pub fn fields(names: Vec<String>) -> Self {
        CaptureRule {
            source: ValueSource::Fields(names),
            format: None,
            validate: None,
            inline_lora_candidate: false,
        }
    }

    pub fn selector(kind: SelectorKind) -> Self {
        CaptureRule {
            source: ValueSource::Selector(kind),
            format: None,
            validate: None,
            inline_lora_candidate: false,
        }
    }

    pub fn literal(value: Value) -> Self {
        CaptureRule {
            source: ValueSource::Literal(value),
            format: None,
            validate: None,
            inline_lora_candidate: false,
        }
    }

    pub fn with_format(mut self, format: FormatterKind) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_validate(mut self, validate: PredicateKind) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn inline_lora(mut self) -> Self {
        self.inline_lora_candidate = true;
        self
    }
}

impl Serialize for CaptureRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match &self.source {
            ValueSource::Field(name) => map.serialize_entry("field_name", name)?,
            ValueSource::Prefix(prefix) => map.serialize_entry("prefix", prefix)?,
            ValueSource::Fields(names) => map.serialize_entry("fields", names)?,
            ValueSource::Literal(value) => map.serialize_entry("value", value)?,
            ValueSource::Selector(kind) => {
                map.serialize_entry("selector", kind.name())?;
                if let SelectorKind::SelectStackByPrefix {
                    prefix,
                    counter_key,
                    filter_none,
                } = kind
                {
                    map.serialize_entry("prefix", prefix)?;
                    if let Some(counter) = counter_key {
                        map.serialize_entry("counter_key", counter)?;
                    }
                    map.serialize_entry("filter_none", filter_none)?;
                }
            }
        }
        if let Some(format) = &self.format {
            map.serialize_entry("format", format.name())?;
        }
        if let Some(validate) = &self.validate {
            map.serialize_entry("validate", validate.name())?;
        }
        if self.inline_lora_candidate {
            map.serialize_entry("inline_lora_candidate", &true)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CaptureRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: IndexMap<String, Value> = IndexMap::deserialize(deserializer)?;

        let as_str = |value: &Value, key: &str| -> Result<String, D::Error> {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| D::Error::custom(format!("'{key}' must be a string")))
        };

        let source = if let Some(sel) = raw.get("selector") {
            let name = as_str(sel, "selector")?;
            let kind = match name.as_str() {
                "parse_inline_lora_tags" => SelectorKind::ParseInlineLoraTags,
                "split_scheduler_combo" => SelectorKind::SplitSchedulerCombo,
                "collect_loras_from_loader" => SelectorKind::CollectLorasFromLoader,
                "select_stack_by_prefix" => SelectorKind::SelectStackByPrefix {
                    prefix: raw
                        .get("prefix")
                        .map(|v| as_str(v, "prefix"))
                        .transpose()?
                        .ok_or_else(|| {
                            D::Error::custom("select_stack_by_prefix requires 'prefix'")
                        })?,
                    counter_key: raw
                        .get("counter_key")
                        .map(|v| as_str(v, "counter_key"))
                        .transpose()?,
                    filter_none: raw
                        .get("filter_none")
                        .and_then(Value::as_bool)
                        .unwrap_or(true),
                },
                other => return Err(D::Error::custom(format!("unknown selector '{other}'"))),
            };
            ValueSource::Selector(kind)
        } else if let Some(field) = raw.get("field_name") {
            ValueSource::Field(as_str(field, "field_name")?)
        } else if let Some(prefix) = raw.get("prefix") {
            ValueSource::Prefix(as_str(prefix, "prefix")?)
        } else if let Some(fields) = raw.get("fields") {
            let names = fields
                .as_array()
                .ok_or_else(|| D::Error::custom("'fields' must be a list"))?
                .iter()
                .map(|v| as_str(v, "fields"))
                .collect::<Result<Vec<_>, _>>()?;
            ValueSource::Fields(names)
        } else if let Some(value) = raw.get("value") {
            ValueSource::Literal(value.clone())
        } else {
            return Err(D::Error::custom(
                "rule needs one of: field_name, prefix, fields, selector, value",
            ));
        };

        let format = raw
            .get("format")
            .map(|v| as_str(v, "format"))
            .transpose()?
            .map(|name| {
                FormatterKind::parse(&name)
                    .ok_or_else(|| D::Error::custom(format!("unknown formatter '{name}'")))
            })
            .transpose()?;
        let validate = raw
            .get("validate")
            .map(|v| as_str(v, "validate"))
            .transpose()?
            .map(|name| {
                PredicateKind::parse(&name)
                    .ok_or_else(|| D::Error::custom(format!("unknown predicate '{name}'")))
            })
            .transpose()?;
        let inline_lora_candidate = raw
            .get("inline_lora_candidate")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(CaptureRule {
            source,
            format,
            validate,
            inline_lora_candidate,
        })
    }
}

/// The rules of one node class, keyed by target field. Keys are unique.
pub type NodeClassRules = IndexMap<MetaField, CaptureRule>;

/// Capture rules for many classes: class name → per-field rules.
pub type CaptureRuleSet = IndexMap<String, NodeClassRules>;

/// Role of a sampler conditioning input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerRole {
    Positive,
    Negative,
    LatentImage,
}

impl SamplerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplerRole::Positive => "positive",
            SamplerRole::Negative => "negative",
            SamplerRole::LatentImage => "latent_image",
        }
    }
}

/// Role → canonical input name, for one sampler-like class.
pub type SamplerRoleMap = IndexMap<SamplerRole, String>;

/// Explicit sampler membership: class name → role map.
pub type SamplerTable = IndexMap<String, SamplerRoleMap>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_rule_round_trip() {
        let rule = CaptureRule::field("ckpt_name").with_format(FormatterKind::CalcModelHash);
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            value,
            json!({"field_name": "ckpt_name", "format": "calc_model_hash"})
        );
        let back: CaptureRule = serde_json::from_value(value).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn stack_selector_round_trip() {
        let rule = CaptureRule::selector(SelectorKind::SelectStackByPrefix {
            prefix: "lora_name".into(),
            counter_key: Some("lora_count".into()),
            filter_none: true,
        });
        let value = serde_json::to_value(&rule).unwrap();
        let back: CaptureRule = serde_json::from_value(value).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn inline_lora_flag_survives() {
        let rule = CaptureRule::field("positive_prompt")
            .with_validate(PredicateKind::IsPositivePrompt)
            .inline_lora();
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value.get("inline_lora_candidate"), Some(&json!(true)));
        let back: CaptureRule = serde_json::from_value(value).unwrap();
        assert!(back.inline_lora_candidate);
    }

    #[test]
    fn literal_rule_round_trip() {
        let rule = CaptureRule::literal(json!(0));
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value, json!({"value": 0}));
        let back: CaptureRule = serde_json::from_value(value).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn unknown_selector_rejected() {
        let err = serde_json::from_value::<CaptureRule>(json!({"selector": "bogus"}));
        assert!(err.is_err());
    }

    #[test]
    fn sampler_roles_serialize_snake_case() {
        let mut roles: SamplerRoleMap = IndexMap::new();
        roles.insert(SamplerRole::Positive, "positive".into());
        roles.insert(SamplerRole::LatentImage, "latent_image".into());
        let value = serde_json::to_value(&roles).unwrap();
        assert_eq!(
            value,
            json!({"positive": "positive", "latent_image": "latent_image"})
        );
    }
}
