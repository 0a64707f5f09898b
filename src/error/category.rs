//! Error classification used to route failure handling.

use serde::{Deserialize, Serialize};

/// Broad error category.
///
/// `Configuration` errors make a model or action unusable but leave the
/// process running. `ArgumentParse` problems are downgraded to warnings by
/// the parser. `Dispatch` errors end the loop without a function message.
/// `Transport` errors are handed back to the model as text. `Runtime`
/// errors fail the turn and reset the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    ArgumentParse,
    Dispatch,
    Transport,
    Runtime,
}
