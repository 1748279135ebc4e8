//! Schema checking and normalization of extracted backend payloads.
//!
//! A [`SchemaRef`] lists the field paths a payload must (or may) carry. Paths are
//! dot-separated; a segment may list alternative keys as `questions|items|list`
//! and end in `[]` to apply the rest of the path to every array element.
//! Violations are reported with the concrete path, e.g. `questions[3].text`.

use serde::de::DeserializeOwned;
use serde_json::Value;
use strum_macros::Display;

use crate::error::PipelineError;
use crate::json_extract::ExtractedCandidate;

/// A payload accepted from the backend, with non-fatal normalization notes.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedResult<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> ValidatedResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ValidatedResult<U> {
        ValidatedResult {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum JsonKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// String or object, as used for loosely shaped list entries.
    Any,
}

impl JsonKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            JsonKind::String => value.is_string(),
            JsonKind::Number => value.is_number(),
            JsonKind::Boolean => value.is_boolean(),
            JsonKind::Object => value.is_object(),
            JsonKind::Array => value.is_array(),
            JsonKind::Any => !value.is_null(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    Required,
    Optional,
    /// Required, and a string must not be blank, an array not empty.
    NonEmpty,
    /// Required non-degenerate label string.
    Label,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub path: &'static str,
    pub kind: JsonKind,
    pub rule: FieldRule,
}

impl FieldSpec {
    pub const fn required(path: &'static str, kind: JsonKind) -> Self {
        Self { path, kind, rule: FieldRule::Required }
    }

    pub const fn optional(path: &'static str, kind: JsonKind) -> Self {
        Self { path, kind, rule: FieldRule::Optional }
    }

    pub const fn non_empty(path: &'static str, kind: JsonKind) -> Self {
        Self { path, kind, rule: FieldRule::NonEmpty }
    }

    pub const fn label(path: &'static str) -> Self {
        Self { path, kind: JsonKind::String, rule: FieldRule::Label }
    }
}

/// Named description of the shape expected from one generation call.
#[derive(Debug)]
pub struct SchemaRef {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

/// A typed payload the generation pipeline can produce.
pub trait Payload: DeserializeOwned {
    const SCHEMA: &'static SchemaRef;

    /// Semantic checks after deserialization. May record warnings.
    fn check(&self, _warnings: &mut Vec<String>) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Schema check, typed deserialization and semantic check of a candidate.
pub fn validate_candidate<T: Payload>(
    candidate: &ExtractedCandidate,
) -> Result<ValidatedResult<T>, PipelineError> {
    check_schema(&candidate.value, T::SCHEMA)?;
    let value: T = serde_json::from_value(candidate.value.clone())
        .map_err(|e| PipelineError::schema(T::SCHEMA.name, e.to_string()))?;
    let mut warnings = Vec::new();
    value.check(&mut warnings)?;
    Ok(ValidatedResult { value, warnings })
}

pub fn check_schema(value: &Value, schema: &SchemaRef) -> Result<(), PipelineError> {
    if !value.is_object() {
        return Err(PipelineError::schema(schema.name, "object"));
    }
    for field in schema.fields {
        let segments: Vec<&str> = field.path.split('.').collect();
        visit(value, &segments, String::new(), field)?;
    }
    Ok(())
}

fn visit(node: &Value, segments: &[&str], prefix: String, field: &FieldSpec) -> Result<(), PipelineError> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(());
    };
    let Value::Object(map) = node else {
        // a wrong container type is reported by the parent field
        return Ok(());
    };
    let (keys, each) = match segment.strip_suffix("[]") {
        Some(keys) => (keys, true),
        None => (*segment, false),
    };
    let found = keys
        .split('|')
        .find_map(|k| map.get(k).filter(|v| !v.is_null()).map(|v| (k, v)));
    let primary = keys.split('|').next().unwrap_or(keys);

    let Some((key, child)) = found else {
        if rest.is_empty() && field.rule != FieldRule::Optional {
            return Err(PipelineError::schema(join(&prefix, primary), field.kind.to_string()));
        }
        return Ok(());
    };
    let path = join(&prefix, key);

    if each {
        let Value::Array(items) = child else {
            return Err(PipelineError::schema(path, "array"));
        };
        if rest.is_empty() && field.rule == FieldRule::NonEmpty && items.is_empty() {
            return Err(PipelineError::schema(path, "non-empty array"));
        }
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{path}[{i}]");
            if rest.is_empty() {
                check_leaf(item, &item_path, field)?;
            } else {
                visit(item, rest, item_path, field)?;
            }
        }
        return Ok(());
    }

    if rest.is_empty() {
        check_leaf(child, &path, field)
    } else {
        visit(child, rest, path, field)
    }
}

fn check_leaf(value: &Value, path: &str, field: &FieldSpec) -> Result<(), PipelineError> {
    if !field.kind.matches(value) {
        return Err(PipelineError::schema(path, field.kind.to_string()));
    }
    match field.rule {
        FieldRule::Required | FieldRule::Optional => Ok(()),
        FieldRule::NonEmpty => {
            let blank = match value {
                Value::String(s) => s.trim().is_empty(),
                Value::Array(a) => a.is_empty(),
                _ => false,
            };
            if blank {
                Err(PipelineError::schema(path, format!("non-empty {}", field.kind)))
            } else {
                Ok(())
            }
        }
        FieldRule::Label => {
            let text = value.as_str().unwrap_or_default();
            if is_degenerate_label(text) {
                Err(PipelineError::degenerate(path, text))
            } else {
                Ok(())
            }
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// True when a label carries no meaning beyond naming a side: blank, a bare
/// `A`/`B`, or text whose only ASCII letter is a single `A` or `B`
/// (`"A안"`, `"선택 B"`).
pub fn is_degenerate_label(label: &str) -> bool {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return true;
    }
    if trimmed.chars().count() <= 2 && (trimmed.eq_ignore_ascii_case("a") || trimmed.eq_ignore_ascii_case("b")) {
        return true;
    }
    let letters: String = trimmed
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    letters == "A" || letters == "B"
}

/// Confidence as a 0–1 fraction rounded to two decimals. Values above 1 are
/// read as percentages.
pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let fraction = if raw > 1.0 { raw / 100.0 } else { raw };
    (fraction.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Integer-percent view of [`normalize_confidence`].
pub fn confidence_percent(raw: f64) -> u8 {
    (normalize_confidence(raw) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn degenerate_labels() {
        for label in ["A", "b", "  ", "A안", "선택 B", "A 선택", "(B)"] {
            assert!(is_degenerate_label(label), "{label:?} should be degenerate");
        }
        for label in ["안정성을 우선하며 현상 유지", "Stay", "AB", "Take the offer"] {
            assert!(!is_degenerate_label(label), "{label:?} should be accepted");
        }
    }

    #[test]
    fn confidence_scale() {
        assert_eq!(normalize_confidence(87.0), 0.87);
        assert_eq!(normalize_confidence(0.42), 0.42);
        assert_eq!(normalize_confidence(0.426), 0.43);
        assert_eq!(normalize_confidence(250.0), 1.0);
        assert_eq!(normalize_confidence(-3.0), 0.0);
        assert_eq!(confidence_percent(87.0), 87);
        assert_eq!(confidence_percent(0.42), 42);
    }

    const PAIR_FIELDS: [FieldSpec; 4] = [
        FieldSpec::label("left"),
        FieldSpec::label("right"),
        FieldSpec::non_empty("items|list[]", JsonKind::Object),
        FieldSpec::required("items|list[].text", JsonKind::String),
    ];
    const PAIR_SCHEMA: SchemaRef = SchemaRef {
        name: "pair",
        fields: &PAIR_FIELDS,
    };

    #[derive(Debug, Deserialize)]
    struct Pair {
        left: String,
        right: String,
        #[serde(alias = "list")]
        items: Vec<Item>,
    }

    #[derive(Debug, Deserialize)]
    struct Item {
        text: String,
    }

    impl Payload for Pair {
        const SCHEMA: &'static SchemaRef = &PAIR_SCHEMA;

        fn check(&self, warnings: &mut Vec<String>) -> Result<(), PipelineError> {
            if self.items.len() > 1 {
                warnings.push(format!("{} items", self.items.len()));
            }
            Ok(())
        }
    }

    fn candidate(value: Value) -> ExtractedCandidate {
        ExtractedCandidate {
            text: value.to_string(),
            value,
        }
    }

    #[test]
    fn accepts_alias_keys_and_collects_warnings() {
        let c = candidate(json!({
            "left": "Stay", "right": "Leave",
            "list": [{"text": "one"}, {"text": "two"}]
        }));
        let ok = validate_candidate::<Pair>(&c).unwrap();
        assert_eq!(ok.value.items[1].text, "two");
        assert_eq!(ok.value.left, "Stay");
        assert_eq!(ok.value.right, "Leave");
        assert_eq!(ok.warnings, vec!["2 items".to_string()]);
    }

    #[test]
    fn reports_concrete_path_of_missing_field() {
        let c = candidate(json!({
            "left": "Stay", "right": "Leave",
            "items": [{"text": "one"}, {"title": "two"}]
        }));
        match validate_candidate::<Pair>(&c) {
            Err(PipelineError::SchemaViolation { path, expected }) => {
                assert_eq!(path, "items[1].text");
                assert_eq!(expected, "string");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn degenerate_label_is_rejected() {
        let c = candidate(json!({
            "left": "A안", "right": "Leave",
            "items": [{"text": "one"}]
        }));
        match validate_candidate::<Pair>(&c) {
            Err(PipelineError::DegenerateOutput { field, value }) => {
                assert_eq!(field, "left");
                assert_eq!(value, "A안");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wrong_container_and_empty_list() {
        let c = candidate(json!([1, 2]));
        assert!(matches!(
            validate_candidate::<Pair>(&c),
            Err(PipelineError::SchemaViolation { .. })
        ));
        let c = candidate(json!({"left": "Stay", "right": "Leave", "items": []}));
        match validate_candidate::<Pair>(&c) {
            Err(PipelineError::SchemaViolation { path, .. }) => assert_eq!(path, "items"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
