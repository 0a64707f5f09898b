//! Core types for agentry.

pub mod function_call;
pub mod message;

pub use function_call::*;
pub use message::*;
