//! Shared test helpers and mock backend.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use agentry::app::{Application, BackendFactory};
use agentry::config::AgentryConfig;
use agentry::error::AgentryError;
use agentry::history::HistoryBackend;
use agentry::models::{EngineKind, LlmModel};
use agentry::provider::{LlmBackend, LlmRequest, LlmResponse};
use agentry::types::FunctionCall;

/// A mock backend that returns canned responses in order.
pub struct MockBackend {
    model: LlmModel,
    responses: Mutex<Vec<Result<LlmResponse, AgentryError>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Self::with_model(LlmModel::new(EngineKind::OpenAi, "gpt-4o"))
    }

    pub fn with_model(model: LlmModel) -> Arc<Self> {
        Arc::new(Self {
            model,
            responses: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue a text response.
    pub fn queue_response(&self, text: &str) {
        self.responses
            .lock()
            .unwrap()
            .push(Ok(LlmResponse::text(text)));
    }

    /// Queue a function call whose arguments arrive as a JSON string, the
    /// way the chat API sends them.
    pub fn queue_function_call(&self, name: &str, args: Value) {
        self.responses
            .lock()
            .unwrap()
            .push(Ok(LlmResponse::function_call(FunctionCall::new(
                name,
                Value::String(args.to_string()),
            ))));
    }

    pub fn queue_error(&self, err: AgentryError) {
        self.responses.lock().unwrap().push(Err(err));
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn model(&self) -> &LlmModel {
        &self.model
    }

    async fn generate(
        &self,
        request: &LlmRequest,
        _cancel: &CancellationToken,
    ) -> Result<LlmResponse, AgentryError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(LlmResponse::text("Mock response"));
        }
        responses.remove(0)
    }
}

/// A factory that hands every session the same mock.
pub fn mock_factory(backend: Arc<MockBackend>) -> BackendFactory {
    Arc::new(
        move |_model: &LlmModel,
              _config: &AgentryConfig|
              -> Result<Arc<dyn LlmBackend>, AgentryError> {
            Ok(Arc::clone(&backend) as Arc<dyn LlmBackend>)
        },
    )
}

/// Write a JSON manifest into `dir`.
pub fn write_agent(dir: &Path, name: &str, manifest: Value) {
    std::fs::write(
        dir.join(format!("{name}.json")),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

/// Config rooted in a temp dir, no secrets from the environment.
pub fn test_config(root: &Path) -> AgentryConfig {
    AgentryConfig::builder()
        .agents_dir(root.join("agents"))
        .history_dir(root.join("history"))
        .build()
}

/// An application over `root/agents` with in-memory history and the mock.
pub fn test_app(root: &Path, backend: Arc<MockBackend>) -> Application {
    Application::new(test_config(root))
        .unwrap()
        .with_history(HistoryBackend::memory())
        .with_backend_factory(mock_factory(backend))
}
