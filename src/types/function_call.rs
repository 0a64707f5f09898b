//! Function calls requested by the model.

use serde::{Deserialize, Serialize};

/// A model-declared request to invoke a named function.
///
/// `arguments` holds either a structured JSON value or, when the model sent
/// something that does not decode as JSON, the raw string as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Whether the arguments are still an undecoded string.
    pub fn has_raw_arguments(&self) -> bool {
        self.arguments.is_string()
    }
}
