//! Error types for agentry.

pub mod category;

pub use category::ErrorCategory;

use thiserror::Error;

/// Primary error type for all agentry operations.
#[derive(Error, Debug)]
pub enum AgentryError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Dispatch error in {function}: {message}")]
    Dispatch { function: String, message: String },

    #[error("App key is bound to {expected}, refusing to send it to {actual}")]
    DomainMismatch { expected: String, actual: String },

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Operation canceled")]
    Canceled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl AgentryError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a dispatch error for a named function.
    pub fn dispatch(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dispatch {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::Manifest(_) | Self::ModelNotFound(_) => {
                ErrorCategory::Configuration
            }
            Self::Serialization(_) | Self::InvalidArgument(_) => ErrorCategory::ArgumentParse,
            Self::Template(_)
            | Self::FunctionNotFound(_)
            | Self::Dispatch { .. }
            | Self::DomainMismatch { .. }
            | Self::Io(_) => ErrorCategory::Dispatch,
            Self::Api { .. } | Self::Network(_) | Self::Timeout(_) | Self::Sandbox(_) => {
                ErrorCategory::Transport
            }
            Self::Yaml(_) => ErrorCategory::Configuration,
            Self::Canceled | Self::InvalidState(_) => ErrorCategory::Runtime,
        }
    }

    /// Whether the model should see this error as a function result and
    /// get a chance to retry with different arguments.
    pub fn is_recoverable_by_model(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transport)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgentryError>;
