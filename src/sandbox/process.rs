//! Subprocess-backed sandbox: one long-lived interpreter per notebook, so
//! names defined in one cell stay visible to the next.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{code_echo, CodeRun, CodeSandbox, NotebookInfo};
use crate::error::AgentryError;
use crate::util::timeout::with_timeout;

const DEFAULT_INTERPRETER: &str = "python3";

/// Line that terminates a cell on stdin and its output on stdout.
const CELL_END: &str = "__agentry_cell_end__";

/// Read cells up to `CELL_END`, exec them in one namespace, then print the
/// marker. Tracebacks go to stdout so they reach the model.
const PYTHON_DRIVER: &str = r#"
import sys, traceback
END = "__agentry_cell_end__"
namespace = {"__name__": "__main__"}
sys.stderr = sys.stdout
while True:
    lines = []
    while True:
        line = sys.stdin.readline()
        if not line:
            sys.exit(0)
        if line.rstrip("\r\n") == END:
            break
        lines.append(line)
    try:
        exec(compile("".join(lines), "<cell>", "exec"), namespace)
    except SystemExit:
        pass
    except BaseException:
        traceback.print_exc()
    sys.stdout.write("\n" + END + "\n")
    sys.stdout.flush()
"#;

#[derive(Debug, Default)]
struct NotebookState {
    name: Option<String>,
    cells: Vec<serde_json::Value>,
}

/// A running interpreter and its pipes.
#[derive(Debug)]
struct Interpreter {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Interpreter {
    async fn run_cell(&mut self, source: &str) -> Result<String, AgentryError> {
        let mut payload = source.to_string();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        payload.push_str(CELL_END);
        payload.push('\n');
        self.stdin.write_all(payload.as_bytes()).await?;
        self.stdin.flush().await?;

        let mut output = String::new();
        loop {
            let mut line = String::new();
            if self.stdout.read_line(&mut line).await? == 0 {
                return Err(AgentryError::Sandbox("interpreter exited".into()));
            }
            if line.trim_end_matches(['\r', '\n']) == CELL_END {
                break;
            }
            output.push_str(&line);
        }
        Ok(output.trim_end().to_string())
    }

    async fn shutdown(mut self) {
        if let Err(err) = self.child.kill().await {
            warn!(error = %err, "killing interpreter failed");
        }
    }
}

/// Runs code with a local interpreter inside a per-sandbox working
/// directory and keeps an `.ipynb` record of every cell.
///
/// The interpreter starts with the notebook (or on the first cell) and
/// lives until [`CodeSandbox::stop`]. A cell that exceeds the timeout kills
/// it; the next cell starts a fresh one.
#[derive(Debug)]
pub struct ProcessSandbox {
    work_dir: PathBuf,
    program: String,
    args: Vec<String>,
    timeout: Duration,
    state: Mutex<NotebookState>,
    process: Mutex<Option<Interpreter>>,
}

impl ProcessSandbox {
    pub fn new(work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            work_dir: work_dir.into(),
            program: DEFAULT_INTERPRETER.to_string(),
            args: python_args(),
            timeout,
            state: Mutex::new(NotebookState::default()),
            process: Mutex::new(None),
        }
    }

    /// Use another Python executable.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.program = interpreter.into();
        self.args = python_args();
        self
    }

    /// Use an arbitrary program that speaks the cell protocol: it reads
    /// lines up to the end marker and answers with output ending in the
    /// same marker.
    pub fn with_command(
        mut self,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.program = program.into();
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn spawn(&self) -> Result<Interpreter, AgentryError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentryError::Sandbox(format!("cannot start {}: {e}", self.program)))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(AgentryError::Sandbox("interpreter pipes unavailable".into()));
        };
        debug!(program = %self.program, pid = ?child.id(), "interpreter started");
        Ok(Interpreter {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn execute(&self, source: &str) -> Result<String, AgentryError> {
        let mut slot = self.process.lock().await;
        if slot.is_none() {
            *slot = Some(self.spawn()?);
        }
        let Some(interpreter) = slot.as_mut() else {
            return Err(AgentryError::Sandbox("interpreter unavailable".into()));
        };

        let result = with_timeout(self.timeout, interpreter.run_cell(source)).await;
        if let Err(ref err) = result {
            warn!(error = %err, "cell failed, restarting interpreter on next run");
            if let Some(dead) = slot.take() {
                dead.shutdown().await;
            }
        }
        result
    }

    async fn stop_interpreter(&self) {
        if let Some(interpreter) = self.process.lock().await.take() {
            interpreter.shutdown().await;
        }
    }

    async fn save_notebook(&self, state: &NotebookState) -> Result<(), AgentryError> {
        let Some(ref name) = state.name else {
            return Ok(());
        };
        let notebook = json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {},
            "cells": state.cells,
        });
        let path = self.work_dir.join(format!("{name}.ipynb"));
        tokio::fs::write(&path, serde_json::to_vec_pretty(&notebook)?).await?;
        Ok(())
    }
}

fn python_args() -> Vec<String> {
    vec!["-u".to_string(), "-c".to_string(), PYTHON_DRIVER.to_string()]
}

#[async_trait]
impl CodeSandbox for ProcessSandbox {
    async fn create_notebook(&self, model_name: &str) -> Result<NotebookInfo, AgentryError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        self.stop_interpreter().await;
        *self.process.lock().await = Some(self.spawn()?);

        let notebook_name = format!(
            "{}-{}",
            model_name.replace(|c: char| !c.is_ascii_alphanumeric(), "_"),
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        );
        let mut state = self.state.lock().await;
        state.name = Some(notebook_name.clone());
        state.cells.clear();
        self.save_notebook(&state).await?;
        Ok(NotebookInfo {
            summary: format!("Notebook {notebook_name} ready in {}", self.work_dir.display()),
            notebook_name,
        })
    }

    async fn run_code(&self, code: &[String], _query: &str) -> Result<CodeRun, AgentryError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let source = code.join("\n");
        let result = self.execute(&source).await?;

        let mut state = self.state.lock().await;
        let count = state.cells.len() + 1;
        state.cells.push(json!({
            "cell_type": "code",
            "execution_count": count,
            "metadata": {},
            "source": source,
            "outputs": [{"output_type": "stream", "name": "stdout", "text": result}],
        }));
        self.save_notebook(&state).await?;

        Ok(CodeRun {
            result,
            echo: Some(code_echo(code)),
        })
    }

    async fn stop(&self) -> Result<(), AgentryError> {
        self.stop_interpreter().await;
        let mut state = self.state.lock().await;
        self.save_notebook(&state).await?;
        state.name = None;
        Ok(())
    }
}
