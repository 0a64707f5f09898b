//! Code-execution sandbox used by notebook agents.

pub mod process;

pub use process::ProcessSandbox;

use async_trait::async_trait;

use crate::error::AgentryError;

/// Result of preparing a notebook.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookInfo {
    pub summary: String,
    pub notebook_name: String,
}

/// Result of running one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeRun {
    pub result: String,
    /// Transcript note showing what ran.
    pub echo: Option<String>,
}

/// External code-execution collaborator.
///
/// Each session owns its own sandbox so a long-running cell never blocks
/// another session.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn create_notebook(&self, model_name: &str) -> Result<NotebookInfo, AgentryError>;

    async fn run_code(&self, code: &[String], query: &str) -> Result<CodeRun, AgentryError>;

    async fn stop(&self) -> Result<(), AgentryError>;
}

/// Render code lines as a fenced Python block.
pub fn code_echo(code: &[String]) -> String {
    format!("```python\n{}\n```", code.join("\n"))
}
