//! Conversation loop states and the result of one `ask`.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::functions::EmitEvent;
use crate::types::{Message, Role};

/// Where the conversation loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoopState {
    Idle,
    AwaitingModel,
    DispatchingFunction,
    Done,
    Failed,
}

impl LoopState {
    /// Whether a new question may start from this state.
    pub fn accepts_question(self) -> bool {
        matches!(self, Self::Idle | Self::Done)
    }
}

/// What one `ask` produced.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Messages appended after the user question, in order.
    pub messages: Vec<Message>,
    /// Session-control signal raised by an emit action.
    pub emit: Option<EmitEvent>,
    /// Model invocations made.
    pub turns: usize,
    /// The loop stopped because it hit the turn limit.
    pub turn_limit_reached: bool,
}

impl Reply {
    pub(crate) fn new() -> Self {
        Self {
            messages: Vec::new(),
            emit: None,
            turns: 0,
            turn_limit_reached: false,
        }
    }

    /// Last assistant text of the turn.
    pub fn text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Function results of the turn.
    pub fn function_results(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::Function)
    }
}
