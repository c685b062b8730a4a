//! Reply text extraction from backend output.
//!
//! Backends disagree on the shape of `output`: a plain string, a list of
//! token strings, a list of content parts, or a single object. This module
//! flattens all of them into one cleaned-up string.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::errors::{ReplicateError, ReplicateResult};

/// Object fields that may carry reply text, in lookup order.
pub const TEXT_FIELDS: [&str; 7] = [
    "text",
    "content",
    "output_text",
    "output",
    "message",
    "response",
    "generated_text",
];

/// Pulls raw text out of a backend `output` value.
///
/// Arrays are concatenated in order with no separator, which is how
/// token-streaming backends deliver their output. Returns `None` when
/// nothing text-like is present.
pub fn extract_text(output: &Value) -> Option<String> {
    match output {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(extract_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.concat())
            }
        }
        Value::Object(map) => TEXT_FIELDS
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(extract_text),
        _ => None,
    }
}

fn blank_run() -> Option<&'static Regex> {
    static BLANK_RUN: OnceLock<Option<Regex>> = OnceLock::new();
    BLANK_RUN.get_or_init(|| Regex::new(r"\n{3,}").ok()).as_ref()
}

/// Cleans up reply text.
///
/// Line endings become `\n`, trailing whitespace is stripped from every line,
/// runs of three or more newlines shrink to two, and the result is trimmed.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed_lines = unified
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");

    let collapsed = match blank_run() {
        Some(re) => re.replace_all(&trimmed_lines, "\n\n").into_owned(),
        None => trimmed_lines,
    };

    collapsed.trim().to_string()
}

/// Extracts and normalizes reply text, failing on empty output.
pub fn normalize_output(output: &Value, backend: &str) -> ReplicateResult<String> {
    let text = extract_text(output)
        .map(|raw| normalize_text(&raw))
        .unwrap_or_default();

    if text.is_empty() {
        return Err(ReplicateError::EmptyResponse {
            backend: backend.to_string(),
        });
    }
    Ok(text)
}
