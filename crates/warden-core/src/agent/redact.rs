//! Redacted summaries of tool output
//!
//! Tool results can echo credentials back (connection strings, tokens in
//! headers). Everything that reaches a `tool_output` event goes through
//! [`redact`] first.

use serde_json::{Map, Value};

pub const MASK: &str = "***";

/// Strings longer than this many chars are cut
const MAX_STRING_CHARS: usize = 2000;

/// Arrays longer than this keep only their head
const MAX_ARRAY_ITEMS: usize = 50;

const MAX_DEPTH: usize = 16;

/// Key fragments that mark a value as secret (matched case-insensitively)
const SECRET_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "api-key",
    "token",
    "password",
    "passwd",
    "secret",
    "authorization",
    "cookie",
    "private_key",
    "credential",
    "session_key",
];

pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_KEYS.iter().any(|needle| key.contains(needle))
}

/// Copy of `value` with secrets masked and oversized parts truncated
pub fn redact(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String("[nested too deep]".to_string());
    }
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                let masked = if is_secret_key(key) && !inner.is_null() {
                    Value::String(MASK.to_string())
                } else {
                    redact_at(inner, depth + 1)
                };
                out.insert(key.clone(), masked);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|item| redact_at(item, depth + 1))
                .collect();
            if items.len() > MAX_ARRAY_ITEMS {
                out.push(Value::String(format!(
                    "[{} more items]",
                    items.len() - MAX_ARRAY_ITEMS
                )));
            }
            Value::Array(out)
        }
        Value::String(s) => Value::String(redact_str(s)),
        other => other.clone(),
    }
}

fn redact_str(s: &str) -> String {
    let bearer = s
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bearer "));
    if bearer && s.len() > 7 {
        return format!("Bearer {}", MASK);
    }
    truncate(s, MAX_STRING_CHARS)
}

/// Cut `s` to at most `max` chars, marking the cut
pub fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}

/// Plain text of a tool result, for prompts and `tool_end` summaries
///
/// Joins the `text` parts of an MCP `content` array; falls back to the
/// compact JSON of the (already redacted) value.
pub fn summarize(value: &Value, max_chars: usize) -> String {
    let text = value
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| value.to_string());
    truncate(&text, max_chars)
}
