//! Convenience re-exports for common use.

pub use crate::app::{Application, Command, CommandOutput};
pub use crate::config::AgentryConfig;
pub use crate::error::{AgentryError, ErrorCategory, Result};
pub use crate::functions::{
    ActionDispatcher, DispatchOutcome, FnFunction, FunctionArguments, FunctionContext,
    FunctionModule, FunctionOutput, LocalFunction, ModuleRegistry,
};
pub use crate::history::{HistoryBackend, HistoryStore};
pub use crate::manifest::Manifest;
pub use crate::models::LlmModel;
pub use crate::provider::{LlmBackend, LlmRequest, LlmResponse};
pub use crate::session::{LoopState, Reply, Session};
pub use crate::types::{FunctionCall, Message, Role};
