//! LLM backend trait and implementations.

pub mod http;

#[cfg(feature = "openai")]
pub mod openai;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::AgentryConfig;
use crate::error::AgentryError;
use crate::models::{CodeExtraction, LlmModel};
use crate::types::{FunctionCall, Message, Role};

/// A request sent to an LLM backend.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    /// Function schemas offered to the model, if any.
    pub functions: Option<Vec<serde_json::Value>>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

/// One model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub role: Role,
    pub text: Option<String>,
    pub function_call: Option<FunctionCall>,
}

impl LlmResponse {
    /// A plain assistant reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: Some(text.into()),
            function_call: None,
        }
    }

    /// An assistant turn that only calls a function.
    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            role: Role::Assistant,
            text: None,
            function_call: Some(call),
        }
    }

    /// Non-empty reply text.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Core trait implemented by every LLM backend.
///
/// Backends are interchangeable: the conversation loop only sees
/// [`LlmRequest`] in and [`LlmResponse`] out.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// The model this backend serves.
    fn model(&self) -> &LlmModel;

    /// How notebook agents should read fenced code from this backend.
    fn code_extraction(&self) -> CodeExtraction {
        self.model().code_extraction
    }

    /// Produce the next turn.
    async fn generate(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, AgentryError>;
}

/// Create a backend for the given model, resolving its secret from config.
#[allow(unused_variables)]
pub fn create_backend(
    model: &LlmModel,
    config: &AgentryConfig,
) -> Result<Box<dyn LlmBackend>, AgentryError> {
    match model.engine {
        #[cfg(feature = "openai")]
        crate::models::EngineKind::OpenAi | crate::models::EngineKind::OpenAiCompatible => {
            let api_key = config.secret(model.secret_key()).map(str::to_string);
            if api_key.is_none() && model.engine == crate::models::EngineKind::OpenAi {
                return Err(AgentryError::Configuration(format!(
                    "Missing {} for model {model}",
                    model.secret_key()
                )));
            }
            let base_url = model
                .base_url
                .clone()
                .or_else(|| config.base_url(model.engine).map(str::to_string));
            Ok(Box::new(openai::OpenAiChatBackend::new(
                model.clone(),
                api_key,
                base_url,
                config.llm_timeout(),
            )?))
        }
        #[allow(unreachable_patterns)]
        _ => Err(AgentryError::ModelNotFound(format!(
            "No backend compiled in for {model}"
        ))),
    }
}
