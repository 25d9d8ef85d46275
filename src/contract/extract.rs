//! Locating the JSON footer in an agent response

use serde_json::{Map, Value};

const FENCE_TAG: &str = "```json";
const FENCE: &str = "```";

/// Extract the output contract object from a response.
///
/// Prefers the last fenced block tagged `json` (case-insensitive); falls back to
/// the span between the last `{` and the last `}`. Anything that does not parse
/// to a JSON object yields `None`.
pub fn extract_contract(text: &str) -> Option<Map<String, Value>> {
    fenced_block(text).or_else(|| trailing_braces(text))
}

fn fenced_block(text: &str) -> Option<Map<String, Value>> {
    // ASCII lowering keeps byte offsets aligned with the original text.
    let lowered = text.to_ascii_lowercase();
    let tag_start = lowered.rfind(FENCE_TAG)?;
    let body_start = tag_start + text[tag_start..].find('\n')? + 1;
    let body_len = text[body_start..].find(FENCE)?;
    let candidate = text[body_start..body_start + body_len].trim();
    if candidate.is_empty() {
        return None;
    }
    parse_object(candidate)
}

fn trailing_braces(text: &str) -> Option<Map<String, Value>> {
    let start = text.rfind('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(text[start..=end].trim())
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
