//! Action dispatch: run a function call and turn the outcome into
//! transcript messages.
//!
//! Resolution order, first match wins:
//! 1. the manifest's action table,
//! 2. the sandbox entry points (notebook agents only),
//! 3. the handler module named by the manifest,
//! 4. otherwise the call fails without producing a message.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::arguments::FunctionArguments;
use super::http_action::{encode_component, HttpActionExecutor};
use super::registry::{FunctionContext, ModuleRegistry};
use super::template::{render, value_to_text};
use crate::config::AgentryConfig;
use crate::error::{AgentryError, Result};
use crate::manifest::{ActionDescriptor, Manifest, RUN_PYTHON_CODE};
use crate::provider::http::build_client;
use crate::sandbox::CodeSandbox;
use crate::types::{FunctionCall, Message};

/// A session-control signal produced by an `emit` action.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitEvent {
    pub method: String,
    pub data: Map<String, Value>,
}

/// Outcome of dispatching one call.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A function result to append, optionally preceded by an echo.
    Completed {
        echo: Option<Message>,
        result: Message,
        /// Re-invoke the model with the result.
        call_again: bool,
    },
    /// The application layer decides what happens next.
    Emitted(EmitEvent),
    /// Nothing is appended and the loop stops.
    Failed {
        function: String,
        error: AgentryError,
    },
}

impl DispatchOutcome {
    pub fn call_again(&self) -> bool {
        matches!(self, Self::Completed { call_again: true, .. })
    }
}

/// Raw product of an executor before transcript shaping.
enum Execution {
    Result { text: String, echo: Option<String> },
    Emit(EmitEvent),
}

/// Routes function calls to actions, the sandbox or registered handlers.
pub struct ActionDispatcher {
    config: Arc<AgentryConfig>,
    http: HttpActionExecutor,
    modules: Arc<ModuleRegistry>,
    sandbox: Option<Arc<dyn CodeSandbox>>,
}

impl ActionDispatcher {
    pub fn new(config: Arc<AgentryConfig>, modules: Arc<ModuleRegistry>) -> Result<Self> {
        let client = build_client(config.http_timeout())?;
        Ok(Self {
            config,
            http: HttpActionExecutor::new(client),
            modules,
            sandbox: None,
        })
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn sandbox(&self) -> Option<&Arc<dyn CodeSandbox>> {
        self.sandbox.as_ref()
    }

    /// Execute `call` for `manifest`. Never returns an error: failures are
    /// either text for the model or a [`DispatchOutcome::Failed`].
    pub async fn dispatch(
        &self,
        manifest: &Manifest,
        call: &FunctionCall,
        ctx: &FunctionContext,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        debug!(function = %call.name, agent = %manifest.name(), "dispatching");
        let executed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentryError::Canceled),
            result = self.execute(manifest, call, ctx) => result,
        };

        let (text, echo) = match executed {
            Ok(Execution::Emit(event)) => return DispatchOutcome::Emitted(event),
            Ok(Execution::Result { text, echo }) => (text, echo),
            Err(err) if err.is_recoverable_by_model() => {
                warn!(function = %call.name, error = %err, "returning failure to the model");
                (err.to_string(), None)
            }
            Err(err) => {
                error!(function = %call.name, error = %err, "dispatch failed");
                return DispatchOutcome::Failed {
                    function: call.name.clone(),
                    error: err,
                };
            }
        };

        let text = match manifest.format_result(&text) {
            Ok(text) => text,
            Err(err) => {
                error!(function = %call.name, error = %err, "result_form failed");
                return DispatchOutcome::Failed {
                    function: call.name.clone(),
                    error: err,
                };
            }
        };

        DispatchOutcome::Completed {
            echo: echo.map(Message::assistant),
            result: Message::function(&call.name, text),
            call_again: !manifest.skip_function_result(),
        }
    }

    async fn execute(
        &self,
        manifest: &Manifest,
        call: &FunctionCall,
        ctx: &FunctionContext,
    ) -> Result<Execution> {
        let args = FunctionArguments::from_value(&call.arguments);

        if let Some(action) = manifest.action(&call.name) {
            return self.execute_action(action, &args).await;
        }

        if manifest.notebook() && call.name == RUN_PYTHON_CODE {
            let sandbox = self.sandbox.as_ref().ok_or_else(|| {
                AgentryError::Configuration("notebook agent has no sandbox".to_string())
            })?;
            let (code, query) = code_arguments(&args, ctx);
            return match sandbox.run_code(&code, &query).await {
                Ok(run) => Ok(Execution::Result {
                    text: run.result,
                    echo: run.echo,
                }),
                Err(err) => Ok(Execution::Result {
                    text: err.to_string(),
                    echo: None,
                }),
            };
        }

        if let Some(module) = manifest.module() {
            if let Some(function) = self.modules.resolve(module, &call.name) {
                return match function.call(&args, ctx).await {
                    Ok(output) => Ok(Execution::Result {
                        text: value_to_text(&output.result),
                        echo: output.echo,
                    }),
                    Err(err) => {
                        warn!(function = %call.name, error = %err, "local function failed");
                        Ok(Execution::Result {
                            text: err.to_string(),
                            echo: None,
                        })
                    }
                };
            }
        }

        Err(AgentryError::FunctionNotFound(call.name.clone()))
    }

    async fn execute_action(
        &self,
        action: &ActionDescriptor,
        args: &FunctionArguments,
    ) -> Result<Execution> {
        let fields = args.fields();
        let text = match action {
            ActionDescriptor::Rest(http) => self.http.rest(http, &fields, &self.config).await?,
            ActionDescriptor::GraphQl(http) => {
                self.http.graphql(http, &fields, &self.config).await?
            }
            ActionDescriptor::DataUrlTemplate {
                template,
                mime_type,
                message,
            } => {
                let source = tokio::fs::read_to_string(template).await.map_err(|e| {
                    AgentryError::dispatch(
                        template.display().to_string(),
                        format!("cannot read template: {e}"),
                    )
                })?;
                let body = render(&source, &fields)?;
                let url = format!("data:{mime_type},{}", encode_component(&body));
                let mut values = fields.clone();
                values.insert("url".to_string(), Value::String(url));
                render(message, &values)?
            }
            ActionDescriptor::MessageTemplate { message } => render(message, &fields)?,
            ActionDescriptor::Emit { method, data } => {
                let mut rendered = Map::with_capacity(data.len());
                for (key, value) in data {
                    let value = match value {
                        Value::String(template) => Value::String(render(template, &fields)?),
                        other => other.clone(),
                    };
                    rendered.insert(key.clone(), value);
                }
                return Ok(Execution::Emit(EmitEvent {
                    method: method.clone(),
                    data: rendered,
                }));
            }
        };
        Ok(Execution::Result { text, echo: None })
    }
}

/// Code lines and query for `run_python_code`. Accepts `code` as a list of
/// lines, a single string, or a bare positional string.
fn code_arguments(args: &FunctionArguments, ctx: &FunctionContext) -> (Vec<String>, String) {
    let code = match args {
        FunctionArguments::Positional(source) => split_lines(source),
        FunctionArguments::Keyword(map) => match map.get("code") {
            Some(Value::Array(lines)) => lines.iter().map(value_to_text).collect(),
            Some(Value::String(source)) => split_lines(source),
            _ => Vec::new(),
        },
    };
    let query = args
        .get_str_opt("query")
        .map(str::to_string)
        .or_else(|| ctx.query.clone())
        .unwrap_or_default();
    (code, query)
}

fn split_lines(source: &str) -> Vec<String> {
    source.lines().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::registry::{FnFunction, FunctionModule, FunctionOutput};
    use crate::sandbox::{CodeRun, NotebookInfo};
    use crate::types::Role;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new(
            Arc::new(AgentryConfig::default()),
            Arc::new(ModuleRegistry::new()),
        )
        .unwrap()
    }

    fn manifest(value: Value) -> Manifest {
        Manifest::from_value("test", value, Path::new(".")).unwrap()
    }

    async fn run(d: &ActionDispatcher, m: &Manifest, name: &str, args: Value) -> DispatchOutcome {
        d.dispatch(
            m,
            &FunctionCall::new(name, args),
            &FunctionContext::default(),
            &CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn message_template_produces_function_message() {
        let m = manifest(json!({
            "actions": {"greet": {"message": "Hello, {name}!"}}
        }));
        match run(&dispatcher(), &m, "greet", json!({"name": "Ada"})).await {
            DispatchOutcome::Completed {
                echo,
                result,
                call_again,
            } => {
                assert!(echo.is_none());
                assert_eq!(result.role, Role::Function);
                assert_eq!(result.name.as_deref(), Some("greet"));
                assert_eq!(result.content, "Hello, Ada!");
                assert!(call_again);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_template_field_fails_dispatch() {
        let m = manifest(json!({"actions": {"greet": {"message": "Hello, {name}!"}}}));
        let outcome = run(&dispatcher(), &m, "greet", json!({})).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { error: AgentryError::Template(_), .. }
        ));
    }

    #[tokio::test]
    async fn skip_function_result_disables_call_again() {
        let m = manifest(json!({
            "skip_function_result": true,
            "actions": {"greet": {"message": "hi"}}
        }));
        let outcome = run(&dispatcher(), &m, "greet", json!({})).await;
        assert!(matches!(outcome, DispatchOutcome::Completed { call_again: false, .. }));
    }

    #[tokio::test]
    async fn result_form_reformats_output() {
        let m = manifest(json!({
            "result_form": "Result: {result}",
            "actions": {"greet": {"message": "hi"}}
        }));
        match run(&dispatcher(), &m, "greet", json!({})).await {
            DispatchOutcome::Completed { result, .. } => assert_eq!(result.content, "Result: hi"),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn emit_renders_data_fields() {
        let m = manifest(json!({
            "actions": {"switch_agent": {
                "type": "emit",
                "emit_method": "switch_session",
                "emit_data": {"name": "{agent}", "priority": 1}
            }}
        }));
        match run(&dispatcher(), &m, "switch_agent", json!({"agent": "chef"})).await {
            DispatchOutcome::Emitted(event) => {
                assert_eq!(event.method, "switch_session");
                assert_eq!(event.data["name"], "chef");
                assert_eq!(event.data["priority"], 1);
            }
            other => panic!("expected Emitted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn data_url_template_encodes_rendered_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("card.svg"), "<text>{label}</text>").unwrap();
        let m = Manifest::from_value(
            "svg",
            json!({"actions": {"draw": {
                "template": "card.svg",
                "mime_type": "image/svg+xml",
                "message": "![card]({url})"
            }}}),
            dir.path(),
        )
        .unwrap();
        match run(&dispatcher(), &m, "draw", json!({"label": "Hi"})).await {
            DispatchOutcome::Completed { result, .. } => assert_eq!(
                result.content,
                "![card](data:image/svg+xml,%3Ctext%3EHi%3C%2Ftext%3E)"
            ),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_data_url_template_is_hard_error() {
        let m = manifest(json!({"actions": {"draw": {"template": "missing.svg"}}}));
        let outcome = run(&dispatcher(), &m, "draw", json!({})).await;
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert!(!outcome.call_again());
    }

    #[tokio::test]
    async fn unknown_function_fails_without_message() {
        let m = manifest(json!({}));
        match run(&dispatcher(), &m, "nope", json!({})).await {
            DispatchOutcome::Failed { function, error } => {
                assert_eq!(function, "nope");
                assert!(matches!(error, AgentryError::FunctionNotFound(_)));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn module_function_receives_keyword_or_positional_args() {
        let module = FunctionModule::new().with(FnFunction::new("echo", |args, _ctx| async move {
            Ok(match args {
                FunctionArguments::Positional(s) => FunctionOutput::new(format!("raw:{s}")),
                FunctionArguments::Keyword(map) => FunctionOutput::new(Value::Object(map)),
            })
        }));
        let d = ActionDispatcher::new(
            Arc::new(AgentryConfig::default()),
            Arc::new(ModuleRegistry::new().with_module("tools", module)),
        )
        .unwrap();
        let m = manifest(json!({"module": "tools"}));

        match run(&d, &m, "echo", json!("plain text")).await {
            DispatchOutcome::Completed { result, .. } => assert_eq!(result.content, "raw:plain text"),
            other => panic!("expected Completed, got {other:?}"),
        }
        match run(&d, &m, "echo", json!({"a": 1})).await {
            DispatchOutcome::Completed { result, .. } => assert_eq!(result.content, "{\"a\":1}"),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_module_function_becomes_text() {
        let module = FunctionModule::new().with(FnFunction::new("boom", |_args, _ctx| async {
            Err(AgentryError::InvalidArgument("bad input".into()))
        }));
        let d = ActionDispatcher::new(
            Arc::new(AgentryConfig::default()),
            Arc::new(ModuleRegistry::new().with_module("tools", module)),
        )
        .unwrap();
        let m = manifest(json!({"module": "tools"}));
        match run(&d, &m, "boom", json!({})).await {
            DispatchOutcome::Completed { result, .. } => {
                assert_eq!(result.content, "Invalid argument: bad input")
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    struct RecordingSandbox;

    #[async_trait]
    impl CodeSandbox for RecordingSandbox {
        async fn create_notebook(&self, model_name: &str) -> Result<NotebookInfo> {
            Ok(NotebookInfo {
                summary: String::new(),
                notebook_name: model_name.to_string(),
            })
        }

        async fn run_code(&self, code: &[String], query: &str) -> Result<CodeRun> {
            Ok(CodeRun {
                result: format!("{} lines for {query}", code.len()),
                echo: Some(code.join("\n")),
            })
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn notebook_routes_run_python_code_to_sandbox() {
        let d = dispatcher().with_sandbox(Arc::new(RecordingSandbox));
        let m = manifest(json!({"notebook": true}));
        let outcome = run(
            &d,
            &m,
            RUN_PYTHON_CODE,
            json!({"code": ["import os", "print(1)"], "query": "count"}),
        )
        .await;
        match outcome {
            DispatchOutcome::Completed { echo, result, .. } => {
                let echo = echo.unwrap();
                assert_eq!(echo.role, Role::Assistant);
                assert_eq!(echo.content, "import os\nprint(1)");
                assert_eq!(result.content, "2 lines for count");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn canceled_dispatch_fails() {
        let m = manifest(json!({"actions": {"greet": {"message": "hi"}}}));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = dispatcher()
            .dispatch(
                &m,
                &FunctionCall::new("greet", json!({})),
                &FunctionContext::default(),
                &cancel,
            )
            .await;
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed { error: AgentryError::Canceled, .. }
        ));
    }
}
