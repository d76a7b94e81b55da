//! Best-effort parsing of an agent's final text into a result value

use serde_json::{json, Value};

/// Fenced `json` block first, then a raw parse, then wrap the whole text as
/// `{"summary": text}`.
pub fn parse_final_text(text: &str) -> Value {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(rest[..end].trim()) {
                return value;
            }
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return value;
    }

    json!({"summary": text})
}
