//! Pulls a single JSON value out of noisy backend text: prose around the
//! payload, Markdown code fences, or trailing garbage after the last bracket.
//! Nothing is repaired; text that does not parse after the two cuts is rejected.

use serde_json::Value;

use crate::error::PipelineError;

/// Text that parsed as a JSON object or array at extraction time.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCandidate {
    pub text: String,
    pub value: Value,
}

/// Extract the first JSON object or array from `raw`.
pub fn extract_json(raw: &str) -> Result<ExtractedCandidate, PipelineError> {
    let body = fenced_interior(raw.trim());

    let start = match (body.find('{'), body.find('[')) {
        (Some(o), Some(a)) => o.min(a),
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return Err(PipelineError::NoJsonFound),
    };
    let slice = body[start..].trim();

    if let Some(candidate) = parse_candidate(slice) {
        return Ok(candidate);
    }

    // second pass: drop whatever trails the last closing bracket
    let end = match (slice.rfind('}'), slice.rfind(']')) {
        (Some(o), Some(a)) => o.max(a),
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return Err(PipelineError::NoJsonFound),
    };
    parse_candidate(&slice[..=end]).ok_or(PipelineError::NoJsonFound)
}

fn parse_candidate(text: &str) -> Option<ExtractedCandidate> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(ExtractedCandidate {
            text: text.to_string(),
            value,
        }),
        _ => None,
    }
}

/// Interior of the first fenced block, skipping an optional language tag line.
/// Without a closing fence everything after the opening one is used.
fn fenced_interior(s: &str) -> &str {
    let Some(open) = s.find("```") else {
        return s;
    };
    let after = &s[open + 3..];
    let after = match after.find('\n') {
        Some(nl) if is_fence_tag(&after[..nl]) => &after[nl + 1..],
        _ => after.strip_prefix("json").unwrap_or(after),
    };
    match after.find("```") {
        Some(close) => after[..close].trim(),
        None => after.trim(),
    }
}

fn is_fence_tag(line: &str) -> bool {
    line.trim().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
