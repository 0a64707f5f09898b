//! Function calls: detection, argument handling, and dispatch to actions,
//! the sandbox, or registered handlers.

pub mod arguments;
pub mod dispatch;
pub mod http_action;
pub mod parser;
pub mod registry;
pub mod template;

pub use arguments::FunctionArguments;
pub use dispatch::{ActionDispatcher, DispatchOutcome, EmitEvent};
pub use parser::FunctionCallParser;
pub use registry::{
    FnFunction, FunctionContext, FunctionModule, FunctionOutput, LocalFunction, ModuleRegistry,
};
