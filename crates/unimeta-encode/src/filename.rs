//! Filename token substitution.
//!
//! `%token%` or `%token:arg%` segments in the filename prefix are replaced
//! from the field map: seed, dimensions, truncated prompts, model base name,
//! and local-time date patterns built from `yyyy MM dd hh mm ss`.

use std::sync::OnceLock;

use chrono::{DateTime, Local};
use regex::Regex;
use serde_json::Value;

use unimeta_capture::fields::{keys, FieldMap};

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%([^%]+)%").expect("static regex"))
}

fn field_string(map: &FieldMap, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn size_component(map: &FieldMap, index: usize) -> String {
    field_string(map, keys::SIZE)
        .split('x')
        .nth(index)
        .unwrap_or("")
        .to_string()
}

fn truncated(text: &str, limit: Option<&str>) -> String {
    let flat = text.replace('\n', " ");
    match limit.and_then(|l| l.parse::<usize>().ok()) {
        Some(limit) => flat.chars().take(limit).collect::<String>().trim().to_string(),
        None => flat.trim().to_string(),
    }
}

fn render_date(now: &DateTime<Local>, pattern: &str) -> String {
    let mut out = pattern.to_string();
    for (token, value) in [
        ("yyyy", format!("{:04}", chrono::Datelike::year(now))),
        ("MM", format!("{:02}", chrono::Datelike::month(now))),
        ("dd", format!("{:02}", chrono::Datelike::day(now))),
        ("hh", format!("{:02}", chrono::Timelike::hour(now))),
        ("mm", format!("{:02}", chrono::Timelike::minute(now))),
        ("ss", format!("{:02}", chrono::Timelike::second(now))),
    ] {
        out = out.replace(token, &value);
    }
    out
}

/// Substitutes all recognized tokens in `prefix`. Unknown tokens are left
/// verbatim.
pub fn format_filename(prefix: &str, map: &FieldMap) -> String {
    format_filename_at(prefix, map, Local::now())
}

/// Deterministic variant used by tests.
pub fn format_filename_at(prefix: &str, map: &FieldMap, now: DateTime<Local>) -> String {
    let mut result = prefix.to_string();
    for segment in token_pattern().find_iter(prefix) {
        let inner = segment.as_str().trim_matches('%');
        let (key, arg) = match inner.split_once(':') {
            Some((key, arg)) => (key, Some(arg)),
            None => (inner, None),
        };
        let replacement = match key {
            "seed" => field_string(map, keys::SEED),
            "width" => size_component(map, 0),
            "height" => size_component(map, 1),
            "pprompt" => truncated(&field_string(map, keys::POSITIVE_PROMPT), arg),
            "nprompt" => truncated(&field_string(map, keys::NEGATIVE_PROMPT), arg),
            "model" => {
                let model = field_string(map, keys::MODEL);
                let base = model.rsplit(['/', '\\']).next().unwrap_or(&model);
                let stem = base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base);
                truncated(stem, arg)
            }
            "date" => render_date(&now, arg.unwrap_or("yyyyMMddhhmmss")),
            _ => continue,
        };
        result = result.replace(segment.as_str(), &replacement);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use indexmap::IndexMap;
    use serde_json::json;

    fn map() -> FieldMap {
        let mut map: FieldMap = IndexMap::new();
        map.insert(keys::SEED.into(), json!(123));
        map.insert(keys::SIZE.into(), json!("512x768"));
        map.insert(keys::POSITIVE_PROMPT.into(), json!("a cat in a hat"));
        map.insert(keys::NEGATIVE_PROMPT.into(), json!("ugly"));
        map.insert(keys::MODEL.into(), json!("cyber_v33.safetensors"));
        map
    }

    fn noon() -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 2, 12, 34, 56).unwrap()
    }

    #[test]
    fn simple_tokens() {
        let out = format_filename_at("img_%seed%_%width%x%height%", &map(), noon());
        assert_eq!(out, "img_123_512x768");
    }

    #[test]
    fn prompt_truncation() {
        let out = format_filename_at("%pprompt:5%", &map(), noon());
        assert_eq!(out, "a cat");
        let out = format_filename_at("%nprompt%", &map(), noon());
        assert_eq!(out, "ugly");
    }

    #[test]
    fn model_token_strips_extension() {
        let out = format_filename_at("%model%", &map(), noon());
        assert_eq!(out, "cyber_v33");
        let out = format_filename_at("%model:5%", &map(), noon());
        assert_eq!(out, "cyber");
    }

    #[test]
    fn date_tokens() {
        assert_eq!(format_filename_at("%date%", &map(), noon()), "20260802123456");
        assert_eq!(
            format_filename_at("%date:yyyy-MM-dd%", &map(), noon()),
            "2026-08-02"
        );
    }

    #[test]
    fn unknown_tokens_survive() {
        assert_eq!(
            format_filename_at("%mystery%_x", &map(), noon()),
            "%mystery%_x"
        );
    }
}
