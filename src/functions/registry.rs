//! Statically registered local function handlers.
//!
//! A manifest's `module` key names a module registered here at startup;
//! nothing is loaded or evaluated at runtime.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::FunctionArguments;
use crate::error::AgentryError;

/// Context available during local function execution.
#[derive(Debug, Clone, Default)]
pub struct FunctionContext {
    /// Agent name of the calling session.
    pub agent: String,
    /// Most recent user message.
    pub query: Option<String>,
}

/// What a local function hands back.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionOutput {
    /// Objects are JSON-encoded before they reach the transcript.
    pub result: serde_json::Value,
    /// Assistant-visible note appended before the result (e.g. the code
    /// that ran).
    pub echo: Option<String>,
}

impl FunctionOutput {
    pub fn new(result: impl Into<serde_json::Value>) -> Self {
        Self {
            result: result.into(),
            echo: None,
        }
    }

    pub fn with_echo(mut self, echo: impl Into<String>) -> Self {
        self.echo = Some(echo.into());
        self
    }
}

/// Implement to expose a function to manifests.
#[async_trait]
pub trait LocalFunction: Send + Sync {
    /// Function name as the model calls it.
    fn name(&self) -> &str;

    async fn call(
        &self,
        args: &FunctionArguments,
        ctx: &FunctionContext,
    ) -> Result<FunctionOutput, AgentryError>;
}

type Handler = dyn Fn(
        FunctionArguments,
        FunctionContext,
    ) -> Pin<Box<dyn Future<Output = Result<FunctionOutput, AgentryError>> + Send>>
    + Send
    + Sync;

/// Closure-based handler for quick registration.
pub struct FnFunction {
    name: String,
    handler: Arc<Handler>,
}

impl FnFunction {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(FunctionArguments, FunctionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FunctionOutput, AgentryError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

#[async_trait]
impl LocalFunction for FnFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        args: &FunctionArguments,
        ctx: &FunctionContext,
    ) -> Result<FunctionOutput, AgentryError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FnFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFunction")
            .field("name", &self.name)
            .finish()
    }
}

/// A named set of handlers.
#[derive(Clone, Default)]
pub struct FunctionModule {
    functions: HashMap<String, Arc<dyn LocalFunction>>,
}

impl FunctionModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, function: impl LocalFunction + 'static) -> Self {
        self.register(Arc::new(function));
        self
    }

    pub fn register(&mut self, function: Arc<dyn LocalFunction>) {
        self.functions.insert(function.name().to_string(), function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LocalFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionModule")
            .field("functions", &self.names())
            .finish()
    }
}

/// Registry of handler modules, keyed by the name manifests use in `module`.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, FunctionModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: impl Into<String>, module: FunctionModule) -> Self {
        self.modules.insert(name.into(), module);
        self
    }

    /// Look up `function` inside `module`.
    pub fn resolve(&self, module: &str, function: &str) -> Option<Arc<dyn LocalFunction>> {
        self.modules.get(module)?.get(function)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }
}
