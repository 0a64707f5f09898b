//! Typed access to function call arguments.

use serde_json::{Map, Value};

use crate::error::AgentryError;

/// Arguments as handed to a handler.
///
/// A bare string (including arguments that never decoded as JSON) is passed
/// positionally; an object is passed as named fields.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArguments {
    Positional(String),
    Keyword(Map<String, Value>),
}

impl FunctionArguments {
    /// Classify a parsed arguments value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Positional(s.clone()),
            Value::Object(map) => Self::Keyword(map.clone()),
            Value::Null => Self::Keyword(Map::new()),
            other => Self::Positional(other.to_string()),
        }
    }

    /// Named fields, or an empty map for positional arguments.
    pub fn fields(&self) -> Map<String, Value> {
        match self {
            Self::Keyword(map) => map.clone(),
            Self::Positional(_) => Map::new(),
        }
    }

    /// Back to a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Positional(s) => Value::String(s.clone()),
            Self::Keyword(map) => Value::Object(map.clone()),
        }
    }

    /// The positional string, if that is what the model sent.
    pub fn positional(&self) -> Option<&str> {
        match self {
            Self::Positional(s) => Some(s),
            Self::Keyword(_) => None,
        }
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, AgentryError> {
        self.get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentryError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// Get a raw field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Keyword(map) => map.get(key),
            Self::Positional(_) => None,
        }
    }

    /// Deserialize the named fields into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, AgentryError> {
        serde_json::from_value(self.to_value()).map_err(|e| {
            AgentryError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}
