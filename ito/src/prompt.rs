//! Prompt rendering and message assembly.
//!
//! The template dialect is deliberately small: `{{.key}}` placeholders are
//! substituted in a single left-to-right pass from a variable map, unknown
//! placeholders stay literal, and there are no conditionals or loops.
//! Substituted values are never re-scanned, so a value containing `{{.x}}`
//! cannot trigger a second expansion.

use std::collections::HashMap;

use serde_json::Value;

use crate::message::ChatMessage;

/// Variables available to [`render`].
pub type TemplateVars = HashMap<String, Value>;

/// Render `template`, substituting every `{{.key}}` occurrence with the
/// formatted value from `vars`.
///
/// String values substitute without quotes; other values substitute as their
/// JSON rendering; `null` substitutes as the empty string. Placeholders with
/// no matching variable remain literal.
#[must_use]
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{.") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 3..];
        match after_open.find("}}") {
            Some(close) => {
                let key = &after_open[..close];
                match vars.get(key) {
                    Some(value) => out.push_str(&format_value(value)),
                    None => {
                        // Unknown placeholder: keep the literal text.
                        out.push_str(&rest[open..open + 3 + close + 2]);
                    }
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated opener: emit the remainder verbatim.
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }

    out.push_str(rest);
    out
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Build the `[system?, history…, user?]` message sequence.
///
/// Empty or absent `system`/`user` entries are omitted.
#[must_use]
pub fn build_messages(
    system: Option<&str>,
    history: &[ChatMessage],
    user: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.extend_from_slice(history);
    if let Some(user) = user.filter(|u| !u.is_empty()) {
        messages.push(ChatMessage::user(user));
    }
    messages
}

/// Build `[history…, system?, user?]` for callers that need the history
/// slot first.
#[must_use]
pub fn build_messages_history_first(
    system: Option<&str>,
    history: &[ChatMessage],
    user: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.extend_from_slice(history);
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    if let Some(user) = user.filter(|u| !u.is_empty()) {
        messages.push(ChatMessage::user(user));
    }
    messages
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> TemplateVars {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    mod render {
        use super::*;

        #[test]
        fn substitutes_string_values() {
            let rendered = render("Hello {{.name}}!", &vars(&[("name", json!("world"))]));
            assert_eq!(rendered, "Hello world!");
        }

        #[test]
        fn substitutes_every_occurrence() {
            let rendered = render(
                "{{.x}} and {{.x}} again",
                &vars(&[("x", json!("twice"))]),
            );
            assert_eq!(rendered, "twice and twice again");
        }

        #[test]
        fn unknown_placeholder_stays_literal() {
            let rendered = render("keep {{.missing}} as-is", &TemplateVars::new());
            assert_eq!(rendered, "keep {{.missing}} as-is");
        }

        #[test]
        fn numbers_render_as_json() {
            let rendered = render("count: {{.n}}", &vars(&[("n", json!(42))]));
            assert_eq!(rendered, "count: 42");
        }

        #[test]
        fn null_renders_empty() {
            let rendered = render("[{{.gone}}]", &vars(&[("gone", Value::Null)]));
            assert_eq!(rendered, "[]");
        }

        #[test]
        fn objects_render_as_json() {
            let rendered = render("{{.obj}}", &vars(&[("obj", json!({"a": 1}))]));
            assert_eq!(rendered, r#"{"a":1}"#);
        }

        #[test]
        fn substituted_values_are_not_rescanned() {
            let rendered = render(
                "{{.a}}",
                &vars(&[("a", json!("{{.b}}")), ("b", json!("nope"))]),
            );
            assert_eq!(rendered, "{{.b}}");
        }

        #[test]
        fn unterminated_opener_is_preserved() {
            let rendered = render("broken {{.key", &vars(&[("key", json!("v"))]));
            assert_eq!(rendered, "broken {{.key");
        }

        #[test]
        fn empty_template() {
            assert_eq!(render("", &TemplateVars::new()), "");
        }
    }

    mod build {
        use super::*;
        use crate::message::Role;

        #[test]
        fn full_sequence_order() {
            let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("ok")];
            let messages = build_messages(Some("be brief"), &history, Some("now"));

            assert_eq!(messages.len(), 4);
            assert_eq!(messages[0].role, Role::System);
            assert_eq!(messages[1].content, "earlier");
            assert_eq!(messages[2].content, "ok");
            assert_eq!(messages[3].role, Role::User);
            assert_eq!(messages[3].content, "now");
        }

        #[test]
        fn empty_system_and_user_are_omitted() {
            let messages = build_messages(Some(""), &[], None);
            assert!(messages.is_empty());

            let messages = build_messages(None, &[], Some("hi"));
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].role, Role::User);
        }

        #[test]
        fn history_first_variant() {
            let history = vec![ChatMessage::assistant("prior")];
            let messages = build_messages_history_first(Some("sys"), &history, Some("ask"));

            assert_eq!(messages[0].content, "prior");
            assert_eq!(messages[1].role, Role::System);
            assert_eq!(messages[2].role, Role::User);
        }
    }
}
