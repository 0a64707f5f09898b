//! Model references and selection.

pub mod selector;

pub use selector::ModelSelector;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

use crate::error::AgentryError;

/// Default model used when a manifest does not name one.
pub const DEFAULT_MODEL: &str = "openai:gpt-4o";

/// Wire protocol family of an LLM backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
pub enum EngineKind {
    /// OpenAI Chat Completions with native function calling.
    #[strum(serialize = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
    /// Any server speaking the Chat Completions protocol without native
    /// function calling (local llama servers and the like).
    #[strum(serialize = "openai-compatible")]
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl EngineKind {
    /// Secret consulted when the model does not name one.
    pub fn default_secret_key(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::OpenAiCompatible => "OPENAI_COMPAT_API_KEY",
        }
    }

    /// How fenced code blocks are treated for notebook agents.
    pub fn default_code_extraction(&self) -> CodeExtraction {
        match self {
            Self::OpenAi => CodeExtraction::Strict,
            Self::OpenAiCompatible => CodeExtraction::Heuristic,
        }
    }
}

/// Policy for turning fenced code blocks into `run_python_code` calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CodeExtraction {
    /// Any fenced block is code to run.
    Strict,
    /// The first line inside the fence must look like an import or a
    /// package install.
    Heuristic,
}

/// A resolved model reference.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LlmModel {
    pub engine: EngineKind,
    pub model_name: String,
    pub max_token: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub code_extraction: CodeExtraction,
}

impl LlmModel {
    pub fn new(engine: EngineKind, model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        Self {
            max_token: default_max_token(&model_name),
            engine,
            model_name,
            secret_key_name: None,
            base_url: None,
            code_extraction: engine.default_code_extraction(),
        }
    }

    /// Name of the secret holding the API key for this model.
    pub fn secret_key(&self) -> &str {
        self.secret_key_name
            .as_deref()
            .unwrap_or_else(|| self.engine.default_secret_key())
    }
}

impl fmt::Display for LlmModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.engine, self.model_name)
    }
}

impl FromStr for LlmModel {
    type Err = AgentryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelSelector::parse(s)
    }
}

/// Inline model definition as written in a manifest.
#[derive(Debug, Deserialize)]
struct InlineModel {
    #[serde(default = "default_engine")]
    engine: EngineKind,
    model: String,
    max_token: Option<u32>,
    api_key: Option<String>,
    base_url: Option<String>,
    code_extraction: Option<CodeExtraction>,
}

fn default_engine() -> EngineKind {
    EngineKind::OpenAi
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelRef {
    Name(String),
    Inline(InlineModel),
}

impl<'de> Deserialize<'de> for LlmModel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ModelRef::deserialize(deserializer)? {
            ModelRef::Name(name) => ModelSelector::parse(&name).map_err(serde::de::Error::custom),
            ModelRef::Inline(inline) => {
                let mut model = LlmModel::new(inline.engine, inline.model);
                if let Some(max) = inline.max_token {
                    model.max_token = max;
                }
                model.secret_key_name = inline.api_key;
                model.base_url = inline.base_url;
                if let Some(policy) = inline.code_extraction {
                    model.code_extraction = policy;
                }
                Ok(model)
            }
        }
    }
}

/// Context window for well-known model names.
fn default_max_token(model_name: &str) -> u32 {
    match model_name {
        "gpt-3.5-turbo" => 4_096,
        "gpt-3.5-turbo-16k" => 16_384,
        "gpt-4" => 8_192,
        "gpt-4-32k" => 32_768,
        name if name.starts_with("gpt-4o") || name.starts_with("gpt-4-turbo") => 128_000,
        name if name.starts_with("gpt-4.1") => 1_000_000,
        _ => 8_192,
    }
}
