//! Function-call detection on a model turn.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::manifest::{Manifest, RUN_PYTHON_CODE};
use crate::models::CodeExtraction;
use crate::provider::LlmResponse;
use crate::types::FunctionCall;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```[\w+.-]*\s*$").expect("fence regex is valid"))
}

/// Produces at most one [`FunctionCall`] per model turn for one manifest.
#[derive(Debug, Clone, Copy)]
pub struct FunctionCallParser<'m> {
    manifest: &'m Manifest,
    extraction: CodeExtraction,
}

impl<'m> FunctionCallParser<'m> {
    pub fn new(manifest: &'m Manifest, extraction: CodeExtraction) -> Self {
        Self {
            manifest,
            extraction,
        }
    }

    /// Detect a call in `response`.
    ///
    /// A native `function_call` always wins. Otherwise, for notebook agents
    /// only, the first complete fenced code block becomes a
    /// `run_python_code` call whose `query` is `last_user_message`.
    pub fn parse(
        &self,
        response: &LlmResponse,
        last_user_message: Option<&str>,
    ) -> Option<FunctionCall> {
        if let Some(ref native) = response.function_call {
            return Some(FunctionCall {
                name: native.name.clone(),
                arguments: decode_arguments(&native.name, &native.arguments),
            });
        }

        if !self.manifest.notebook() {
            return None;
        }

        let text = response.text.as_deref()?;
        let code = extract_code_block(text, self.extraction)?;
        Some(FunctionCall::new(
            RUN_PYTHON_CODE,
            serde_json::json!({
                "code": code,
                "query": last_user_message.unwrap_or_default(),
            }),
        ))
    }
}

/// Decode string arguments as JSON. Undecodable strings are passed through
/// unchanged with a warning so handlers that accept raw text still run.
pub fn decode_arguments(function: &str, arguments: &Value) -> Value {
    let Value::String(raw) = arguments else {
        return arguments.clone();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(err) => {
            warn!(function = %function, error = %err, "function arguments are not JSON, passing raw string");
            arguments.clone()
        }
    }
}

/// Capture the lines of the first complete fenced block.
///
/// Under [`CodeExtraction::Heuristic`] the first captured line must look
/// like an import or a package install, otherwise the block is treated as
/// an illustration and nothing is captured.
pub fn extract_code_block(text: &str, extraction: CodeExtraction) -> Option<Vec<String>> {
    let mut lines = text.lines();
    lines.by_ref().find(|line| fence_re().is_match(line))?;

    let mut code = Vec::new();
    for line in lines {
        if fence_re().is_match(line) {
            if extraction == CodeExtraction::Heuristic
                && !code.first().is_some_and(|first: &String| looks_like_setup(first))
            {
                debug!("fenced block does not start with an import, not running it");
                return None;
            }
            return Some(code);
        }
        code.push(line.to_string());
    }

    debug!(captured = code.len(), "fenced code block was never closed");
    None
}

fn looks_like_setup(line: &str) -> bool {
    let line = line.trim_start();
    ["import ", "from ", "!pip ", "%pip ", "pip install "]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}
