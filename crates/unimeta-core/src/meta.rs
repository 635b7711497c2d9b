//! The closed set of semantic metadata fields.
//!
//! [`MetaField`] names everything the capture pipeline can record. The
//! declaration order is canonical: it governs the order fields appear in
//! rendered output, so existing members must never be reordered. New members
//! are append-only.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A semantic metadata field captured from the workflow graph.
///
/// Serialized by enum name (e.g. `"MODEL_NAME"`), matching the key format of
/// user rule documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetaField {
    PositivePrompt,
    NegativePrompt,
    T5Prompt,
    ClipPrompt,
    ModelName,
    ModelHash,
    VaeName,
    VaeHash,
    ClipModelName,
    ClipSkip,
    Seed,
    Steps,
    Cfg,
    Guidance,
    SamplerName,
    Scheduler,
    Denoise,
    Shift,
    MaxShift,
    BaseShift,
    ImageWidth,
    ImageHeight,
    BatchIndex,
    BatchSize,
    WeightDtype,
    LoraModelName,
    LoraModelHash,
    LoraStrengthModel,
    LoraStrengthClip,
    EmbeddingName,
    EmbeddingHash,
    StartStep,
    EndStep,
}

impl MetaField {
    /// Every member in canonical order.
    pub const ALL: [MetaField; 33] = [
        MetaField::PositivePrompt,
        MetaField::NegativePrompt,
        MetaField::T5Prompt,
        MetaField::ClipPrompt,
        MetaField::ModelName,
        MetaField::ModelHash,
        MetaField::VaeName,
        MetaField::VaeHash,
        MetaField::ClipModelName,
        MetaField::ClipSkip,
        MetaField::Seed,
        MetaField::Steps,
        MetaField::Cfg,
        MetaField::Guidance,
        MetaField::SamplerName,
        MetaField::Scheduler,
        MetaField::Denoise,
        MetaField::Shift,
        MetaField::MaxShift,
        MetaField::BaseShift,
        MetaField::ImageWidth,
        MetaField::ImageHeight,
        MetaField::BatchIndex,
        MetaField::BatchSize,
        MetaField::WeightDtype,
        MetaField::LoraModelName,
        MetaField::LoraModelHash,
        MetaField::LoraStrengthModel,
        MetaField::LoraStrengthClip,
        MetaField::EmbeddingName,
        MetaField::EmbeddingHash,
        MetaField::StartStep,
        MetaField::EndStep,
    ];

    /// The stable enum-name spelling used as a key in rule documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaField::PositivePrompt => "POSITIVE_PROMPT",
            MetaField::NegativePrompt => "NEGATIVE_PROMPT",
            MetaField::T5Prompt => "T5_PROMPT",
            MetaField::ClipPrompt => "CLIP_PROMPT",
            MetaField::ModelName => "MODEL_NAME",
            MetaField::ModelHash => "MODEL_HASH",
            MetaField::VaeName => "VAE_NAME",
            MetaField::VaeHash => "VAE_HASH",
            MetaField::ClipModelName => "CLIP_MODEL_NAME",
            MetaField::ClipSkip => "CLIP_SKIP",
            MetaField::Seed => "SEED",
            MetaField::Steps => "STEPS",
            MetaField::Cfg => "CFG",
            MetaField::Guidance => "GUIDANCE",
            MetaField::SamplerName => "SAMPLER_NAME",
            MetaField::Scheduler => "SCHEDULER",
            MetaField::Denoise => "DENOISE",
            MetaField::Shift => "SHIFT",
            MetaField::MaxShift => "MAX_SHIFT",
            MetaField::BaseShift => "BASE_SHIFT",
            MetaField::ImageWidth => "IMAGE_WIDTH",
            MetaField::ImageHeight => "IMAGE_HEIGHT",
            MetaField::BatchIndex => "BATCH_INDEX",
            MetaField::BatchSize => "BATCH_SIZE",
            MetaField::WeightDtype => "WEIGHT_DTYPE",
            MetaField::LoraModelName => "LORA_MODEL_NAME",
            MetaField::LoraModelHash => "LORA_MODEL_HASH",
            MetaField::LoraStrengthModel => "LORA_STRENGTH_MODEL",
            MetaField::LoraStrengthClip => "LORA_STRENGTH_CLIP",
            MetaField::EmbeddingName => "EMBEDDING_NAME",
            MetaField::EmbeddingHash => "EMBEDDING_HASH",
            MetaField::StartStep => "START_STEP",
            MetaField::EndStep => "END_STEP",
        }
    }

    /// Position in the canonical ordering.
    pub fn canonical_index(&self) -> usize {
        Self::ALL.iter().position(|f| f == self).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for MetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known [`MetaField`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMetaField(pub String);

impl fmt::Display for UnknownMetaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown meta field: '{}'", self.0)
    }
}

impl std::error::Error for UnknownMetaField {}

impl FromStr for MetaField {
    type Err = UnknownMetaField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetaField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownMetaField(s.to_string()))
    }
}

impl Serialize for MetaField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetaField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_declaration_order() {
        assert_eq!(MetaField::PositivePrompt.canonical_index(), 0);
        assert_eq!(MetaField::NegativePrompt.canonical_index(), 1);
        assert!(
            MetaField::SamplerName.canonical_index() < MetaField::Scheduler.canonical_index()
        );
        assert_eq!(
            MetaField::EndStep.canonical_index(),
            MetaField::ALL.len() - 1
        );
    }

    #[test]
    fn round_trips_by_name() {
        for field in MetaField::ALL {
            let parsed: MetaField = field.as_str().parse().unwrap();
            assert_eq!(parsed, field);
        }
    }

    #[test]
    fn serde_uses_enum_names() {
        let json = serde_json::to_string(&MetaField::LoraModelName).unwrap();
        assert_eq!(json, "\"LORA_MODEL_NAME\"");
        let back: MetaField = serde_json::from_str(&json).unwrap();
        assert_eq!(back, MetaField::LoraModelName);
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!("NOT_A_FIELD".parse::<MetaField>().is_err());
        assert!(serde_json::from_str::<MetaField>("\"NOT_A_FIELD\"").is_err());
    }
}
