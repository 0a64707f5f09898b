//! OpenAI Chat Completions backend (legacy `functions` protocol).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AgentryError;
use crate::models::{EngineKind, LlmModel};
use crate::types::{FunctionCall, Message, Role};
use crate::util::timeout::bounded;

use super::http::{bearer_headers, build_client, status_to_error};
use super::{LlmBackend, LlmRequest, LlmResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatBackend {
    model: LlmModel,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiChatBackend {
    pub fn new(
        model: LlmModel,
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AgentryError> {
        Ok(Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: build_client(timeout)?,
            model,
            api_key,
            timeout,
        })
    }

    /// Only the OpenAI engine is sent function schemas; compatible servers
    /// rely on fenced-code extraction instead.
    fn native_functions(&self) -> bool {
        self.model.engine == EngineKind::OpenAi
    }

    fn build_request_body(&self, request: &LlmRequest) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_openai)
            .collect::<Vec<_>>();

        let mut body = serde_json::json!({
            "model": self.model.model_name,
            "messages": messages,
            "temperature": request.temperature,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(max) = request.max_tokens {
                obj.insert("max_tokens".into(), max.into());
            }
            if let Some(ref functions) = request.functions {
                if !functions.is_empty() && self.native_functions() {
                    obj.insert("functions".into(), functions.clone().into());
                }
            }
        }

        body
    }

    async fn send(&self, request: &LlmRequest) -> Result<LlmResponse, AgentryError> {
        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %self.model, messages = request.messages.len(), "chat completion");

        let resp = self
            .client
            .post(&url)
            .headers(bearer_headers(self.api_key.as_deref()))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let data: ChatResponse = resp.json().await?;
        if let Some(usage) = data.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completion usage"
            );
        }
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentryError::api(200, "No choices in chat completion response"))?;

        let role = choice
            .message
            .role
            .as_deref()
            .and_then(|r| r.parse().ok())
            .unwrap_or(Role::Assistant);

        // Arguments stay a raw string here; decoding is the parser's job.
        let function_call = choice.message.function_call.map(|fc| FunctionCall {
            name: fc.name,
            arguments: serde_json::Value::String(fc.arguments),
        });

        Ok(LlmResponse {
            role,
            text: choice.message.content,
            function_call,
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiChatBackend {
    fn model(&self) -> &LlmModel {
        &self.model
    }

    async fn generate(
        &self,
        request: &LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, AgentryError> {
        bounded(self.timeout, cancel, self.send(request)).await
    }
}

fn message_to_openai(msg: &Message) -> serde_json::Value {
    let mut json = serde_json::json!({
        "role": msg.role.to_string(),
        "content": msg.content,
    });
    if let (Some(name), Some(obj)) = (&msg.name, json.as_object_mut()) {
        obj.insert("name".into(), name.clone().into());
    }
    json
}

// Chat Completions response types (internal)

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    role: Option<String>,
    content: Option<String>,
    function_call: Option<ChatFunctionCall>,
}

#[derive(Deserialize)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
