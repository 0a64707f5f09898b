//! `{field}` string templates.
//!
//! Placeholders name a field of a JSON object. String values are inserted
//! as-is, everything else as its JSON text. `{{` and `}}` produce literal
//! braces. A placeholder without a matching field is an error.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::error::{AgentryError, Result};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
    })
}

/// Render `template` against the fields of `values`.
pub fn render(template: &str, values: &Map<String, Value>) -> Result<String> {
    render_with(template, |key| values.get(key).map(value_to_text))
}

/// Render `template`, resolving each placeholder through `lookup`.
pub fn render_with(template: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut missing: Option<String> = None;
    let rendered = placeholder_re().replace_all(template, |caps: &Captures<'_>| {
        match caps.get(1) {
            None if &caps[0] == "{{" => "{".to_string(),
            None => "}".to_string(),
            Some(key) => match lookup(key.as_str()) {
                Some(value) => value,
                None => {
                    missing.get_or_insert_with(|| key.as_str().to_string());
                    String::new()
                }
            },
        }
    });
    match missing {
        Some(key) => Err(AgentryError::Template(format!(
            "missing field '{key}' for template \"{template}\""
        ))),
        None => Ok(rendered.into_owned()),
    }
}

/// Replace a single named placeholder, leaving every other brace alone.
///
/// Prompt text is prose and may contain JSON examples, so prompt
/// substitution must not treat unknown braces as errors.
pub fn substitute(text: &str, key: &str, value: &str) -> String {
    text.replace(&format!("{{{key}}}"), value)
}

/// Text form of a JSON value for template insertion.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
