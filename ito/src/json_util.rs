//! Lenient JSON extraction helpers.
//!
//! Model responses routinely wrap JSON in prose or code fences; the parsers
//! here locate the outermost brace span and parse that, which is the
//! convention every judge/planner call in this crate relies on.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Extract the span from the first `{` to the last `}` of `text`.
///
/// Returns `None` when no balanced-looking span exists.
#[must_use]
pub fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse the first-to-last-brace span of `text` into `T`.
pub fn parse_json_span<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let span = extract_json_span(text).unwrap_or(text);
    serde_json::from_str(span)
}

/// Parse the brace span of `text` into a [`Value`], if possible.
#[must_use]
pub fn parse_json_span_value(text: &str) -> Option<Value> {
    extract_json_span(text).and_then(|span| serde_json::from_str(span).ok())
}

/// Serialize `value` to a JSON string, falling back to its `Display`-style
/// rendering when serialization fails.
#[must_use]
pub fn to_json_or_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extracts_span_with_surrounding_prose() {
        let text = r#"Sure! Here is the plan: {"steps":[]} Hope it helps."#;
        assert_eq!(extract_json_span(text), Some(r#"{"steps":[]}"#));
    }

    #[test]
    fn extracts_nested_braces() {
        let text = r#"prefix {"a":{"b":1}} suffix"#;
        assert_eq!(extract_json_span(text), Some(r#"{"a":{"b":1}}"#));
    }

    #[test]
    fn no_braces_returns_none() {
        assert!(extract_json_span("no json here").is_none());
    }

    #[test]
    fn reversed_braces_return_none() {
        assert!(extract_json_span("} {").is_none());
    }

    #[test]
    fn parse_json_span_into_value() {
        let value = parse_json_span_value(r#"text {"x": 5} text"#).unwrap();
        assert_eq!(value["x"], 5);
    }

    #[test]
    fn parse_json_span_typed() {
        #[derive(serde::Deserialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        let point: Point = parse_json_span(r#"here: {"x":1,"y":2}"#).unwrap();
        assert_eq!(point.x, 1);
        assert_eq!(point.y, 2);
    }

    #[test]
    fn to_json_or_display_unwraps_strings() {
        assert_eq!(to_json_or_display(&Value::String("hi".into())), "hi");
        assert_eq!(to_json_or_display(&serde_json::json!({"a":1})), r#"{"a":1}"#);
        assert_eq!(to_json_or_display(&serde_json::json!(5)), "5");
    }
}
