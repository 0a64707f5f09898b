//! Model selection and parsing.

use std::str::FromStr;

use super::{EngineKind, LlmModel};
use crate::error::AgentryError;

/// Parse an "engine:model" string into an [`LlmModel`].
pub struct ModelSelector;

impl ModelSelector {
    /// Parse "engine:model_name"; a bare model name selects the OpenAI engine.
    ///
    /// Examples: "openai:gpt-4o", "gpt-3.5-turbo", "openai-compatible:llama-3-8b"
    pub fn parse(s: &str) -> Result<LlmModel, AgentryError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AgentryError::InvalidArgument(
                "Empty model selector".to_string(),
            ));
        }

        let Some((engine, model_name)) = s.split_once(':') else {
            return Ok(LlmModel::new(EngineKind::OpenAi, s));
        };

        let engine = match engine {
            "openai" => EngineKind::OpenAi,
            "openai-compatible" | "openai_compatible" | "local" => EngineKind::OpenAiCompatible,
            other => EngineKind::from_str(other)
                .map_err(|_| AgentryError::ModelNotFound(format!("Unknown engine: {other}")))?,
        };

        if model_name.is_empty() {
            return Err(AgentryError::InvalidArgument(format!(
                "Invalid model selector '{s}': missing model name"
            )));
        }

        Ok(LlmModel::new(engine, model_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_defaults_to_openai() {
        let model = ModelSelector::parse("gpt-3.5-turbo").unwrap();
        assert_eq!(model.engine, EngineKind::OpenAi);
        assert_eq!(model.max_token, 4_096);
    }

    #[test]
    fn local_alias_selects_compatible_engine() {
        let model = ModelSelector::parse("local:mistral-7b").unwrap();
        assert_eq!(model.engine, EngineKind::OpenAiCompatible);
        assert_eq!(model.model_name, "mistral-7b");
    }

    #[test]
    fn unknown_engine_is_rejected() {
        assert!(matches!(
            ModelSelector::parse("bogus:thing"),
            Err(AgentryError::ModelNotFound(_))
        ));
        assert!(ModelSelector::parse("openai:").is_err());
        assert!(ModelSelector::parse("  ").is_err());
    }
}
