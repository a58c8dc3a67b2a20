//! Helpers for pulling JSON out of free-form model output.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Extract the outermost JSON object or array from model text.
///
/// Handles fenced code blocks and leading/trailing prose. Returns `None` when
/// no bracketed span exists.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let mut body = text.trim();

    if let Some(start) = body.find("```") {
        let after = &body[start + 3..];
        // Skip a language tag such as ```json
        let after = after.find('\n').map(|i| &after[i + 1..]).unwrap_or(after);
        body = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
    }

    let start = body.find(['{', '['])?;
    let open = body.as_bytes()[start];
    let close = if open == b'{' { '}' } else { ']' };
    let end = body.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

/// Parse model text into `T`, tolerating prose around the JSON.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let block = extract_json_block(text)
        .ok_or_else(|| Error::malformed(format!("no JSON found in: {}", truncate(text, 120))))?;
    serde_json::from_str(block).map_err(|e| Error::malformed(e.to_string()))
}

/// Shorten text for log lines and error messages.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_extract_plain_object() {
        assert_eq!(extract_json_block(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_extract_from_fence_and_prose() {
        let text = "Sure, here you go:\n```json\n{\"shouldFuse\": true}\n```\nAnything else?";
        assert_eq!(extract_json_block(text), Some("{\"shouldFuse\": true}"));
    }

    #[test]
    fn test_extract_array() {
        let v: Value = parse_json("Steps: [\"a\", \"b\"] done").unwrap();
        assert_eq!(v.as_array().map(|a| a.len()), Some(2));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let res: Result<Value> = parse_json("no json here");
        assert!(matches!(res, Err(Error::MalformedResponse(_))));
        let res: Result<Value> = parse_json("{ not: valid }");
        assert!(res.is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
