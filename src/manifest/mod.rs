//! Agent manifests: the declarative definition of one agent.
//!
//! A manifest is a JSON or YAML object. Recognized keys:
//! `title, description, you, bot, model, temperature, functions, actions,
//! prompt, intro, form, result_form, agents, embeddings, notebook, module,
//! skip_function_result, list, resource`.
//!
//! Everything is parsed and validated at load time; a [`Manifest`] is
//! immutable afterwards.

pub mod action;
pub mod prompt;

pub use action::{ActionDescriptor, ActionKind, HttpAction, HttpMethod};
pub use prompt::PromptContext;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AgentryError, Result};
use crate::models::LlmModel;

use action::RawAction;

/// Function name synthesized for fenced code blocks.
pub const RUN_PYTHON_CODE: &str = "run_python_code";

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_ARTICLE_TOKENS: usize = 2_000;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextOrLines {
    Text(String),
    Lines(Vec<String>),
}

impl TextOrLines {
    fn join(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Lines(lines) => lines.join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FunctionsDef {
    Inline(Vec<Value>),
    Path(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntroDef {
    One(String),
    Many(Vec<String>),
}

/// Related-article lookup settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EmbeddingsConfig {
    /// Name of the article collection.
    pub name: String,
    /// Token budget for the injected articles.
    #[serde(default = "default_article_tokens")]
    pub max_tokens: usize,
}

fn default_article_tokens() -> usize {
    DEFAULT_ARTICLE_TOKENS
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    title: Option<String>,
    description: Option<String>,
    you: Option<String>,
    bot: Option<String>,
    model: Option<LlmModel>,
    temperature: Option<f64>,
    functions: Option<FunctionsDef>,
    #[serde(default)]
    actions: HashMap<String, RawAction>,
    prompt: Option<TextOrLines>,
    intro: Option<IntroDef>,
    form: Option<String>,
    result_form: Option<String>,
    agents: Option<Vec<String>>,
    embeddings: Option<EmbeddingsConfig>,
    #[serde(default)]
    notebook: bool,
    module: Option<String>,
    #[serde(default)]
    skip_function_result: bool,
    #[serde(default)]
    list: Vec<String>,
    resource: Option<String>,
}

/// A parsed, validated agent definition.
#[derive(Debug, Clone)]
pub struct Manifest {
    name: String,
    title: String,
    description: Option<String>,
    you: Option<String>,
    bot: Option<String>,
    model: Option<LlmModel>,
    temperature: f64,
    functions: Vec<Value>,
    actions: HashMap<String, ActionDescriptor>,
    prompt: Option<String>,
    intro: Vec<String>,
    form: Option<String>,
    result_form: Option<String>,
    agents: Option<Vec<String>>,
    embeddings: Option<EmbeddingsConfig>,
    notebook: bool,
    module: Option<String>,
    skip_function_result: bool,
    samples: Vec<String>,
    resource: Option<String>,
    base_dir: PathBuf,
}

impl Manifest {
    /// Load a `.json`, `.yaml` or `.yml` manifest. The agent name is the
    /// file stem.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentryError::Manifest(format!("cannot read {}: {e}", path.display()))
        })?;
        let value: Value = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
            Some("json") => serde_json::from_str(&raw)?,
            other => {
                return Err(AgentryError::Manifest(format!(
                    "unsupported manifest extension {other:?} for {}",
                    path.display()
                )))
            }
        };
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("agent")
            .to_string();
        let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        Self::from_value(name, value, &base_dir)
    }

    /// Build from an already-parsed JSON value. Relative paths (functions
    /// file, resource, templates) resolve against `base_dir`.
    pub fn from_value(name: impl Into<String>, value: Value, base_dir: &Path) -> Result<Self> {
        let name = name.into();
        let raw: RawManifest = serde_json::from_value(value)
            .map_err(|e| AgentryError::Manifest(format!("{name}: {e}")))?;

        let mut functions = match raw.functions {
            None => Vec::new(),
            Some(FunctionsDef::Inline(list)) => list,
            Some(FunctionsDef::Path(rel)) => {
                let path = base_dir.join(&rel);
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    AgentryError::Manifest(format!(
                        "{name}: cannot read functions file {}: {e}",
                        path.display()
                    ))
                })?;
                serde_json::from_str(&text)?
            }
        };
        if raw.notebook && !functions.iter().any(|f| f["name"] == RUN_PYTHON_CODE) {
            functions.push(run_python_code_schema());
        }

        let mut actions = HashMap::with_capacity(raw.actions.len());
        for (function, action) in raw.actions {
            let descriptor = action.classify(&function, base_dir)?;
            actions.insert(function, descriptor);
        }

        let resource = match raw.resource {
            None => None,
            Some(rel) => {
                let path = base_dir.join(&rel);
                Some(std::fs::read_to_string(&path).map_err(|e| {
                    AgentryError::Manifest(format!(
                        "{name}: cannot read resource {}: {e}",
                        path.display()
                    ))
                })?)
            }
        };

        Ok(Self {
            title: raw.title.unwrap_or_else(|| name.clone()),
            name,
            description: raw.description,
            you: raw.you,
            bot: raw.bot,
            model: raw.model,
            temperature: raw.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            functions,
            actions,
            prompt: raw.prompt.map(TextOrLines::join),
            intro: match raw.intro {
                None => Vec::new(),
                Some(IntroDef::One(text)) => vec![text],
                Some(IntroDef::Many(list)) => list,
            },
            form: raw.form,
            result_form: raw.result_form,
            agents: raw.agents,
            embeddings: raw.embeddings,
            notebook: raw.notebook,
            module: raw.module,
            skip_function_result: raw.skip_function_result,
            samples: raw.list,
            resource,
            base_dir: base_dir.to_path_buf(),
        })
    }

    /// Agent name (the manifest file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Display name for the user.
    pub fn you(&self) -> &str {
        self.you.as_deref().unwrap_or("You")
    }

    /// Display name for the agent.
    pub fn bot(&self) -> &str {
        self.bot.as_deref().unwrap_or(&self.title)
    }

    /// Model named by the manifest, if any.
    pub fn model(&self) -> Option<&LlmModel> {
        self.model.as_ref()
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Function schemas offered to the model.
    pub fn functions(&self) -> &[Value] {
        &self.functions
    }

    /// Action bound to `function`, if the manifest declares one.
    pub fn action(&self, function: &str) -> Option<&ActionDescriptor> {
        self.actions.get(function)
    }

    pub fn has_prompt(&self) -> bool {
        self.prompt.is_some()
    }

    /// Whether the prompt changes with each question.
    pub fn uses_articles(&self) -> bool {
        self.embeddings.is_some()
            && self
                .prompt
                .as_deref()
                .is_some_and(|p| p.contains("{articles}"))
    }

    /// One intro line, sampled at random.
    pub fn intro(&self) -> Option<&str> {
        self.intro
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    /// Template applied to user input (`{question}`).
    pub fn form(&self) -> Option<&str> {
        self.form.as_deref()
    }

    /// Template applied to function results (`{result}`).
    pub fn result_form(&self) -> Option<&str> {
        self.result_form.as_deref()
    }

    /// Agent names this agent may hand off to; `None` means all.
    pub fn agents(&self) -> Option<&[String]> {
        self.agents.as_deref()
    }

    pub fn embeddings(&self) -> Option<&EmbeddingsConfig> {
        self.embeddings.as_ref()
    }

    /// Code-interpreter agent.
    pub fn notebook(&self) -> bool {
        self.notebook
    }

    /// Name of the registered handler module for this agent.
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Do not re-invoke the model after a function result.
    pub fn skip_function_result(&self) -> bool {
        self.skip_function_result
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

fn run_python_code_schema() -> Value {
    serde_json::json!({
        "name": RUN_PYTHON_CODE,
        "description": "Run Python code in a notebook and return the output",
        "parameters": {
            "type": "object",
            "properties": {
                "code": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Lines of Python code"
                },
                "query": {
                    "type": "string",
                    "description": "The question this code answers"
                }
            },
            "required": ["code"]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn defaults_for_minimal_manifest() {
        let manifest = Manifest::from_value("home", json!({}), Path::new(".")).unwrap();
        assert_eq!(manifest.title(), "home");
        assert_eq!(manifest.bot(), "home");
        assert_eq!(manifest.you(), "You");
        assert!((manifest.temperature() - DEFAULT_TEMPERATURE).abs() < f64::EPSILON);
        assert!(manifest.functions().is_empty());
        assert!(!manifest.notebook());
        assert!(manifest.intro().is_none());
    }

    #[test]
    fn notebook_gets_run_python_code_schema() {
        let manifest =
            Manifest::from_value("nb", json!({"notebook": true}), Path::new(".")).unwrap();
        assert_eq!(manifest.functions().len(), 1);
        assert_eq!(manifest.functions()[0]["name"], RUN_PYTHON_CODE);
    }

    #[test]
    fn loads_yaml_with_functions_file_and_resource() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("functions.json"),
            r#"[{"name": "get_weather", "parameters": {"type": "object"}}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("facts.txt"), "The sky is blue.").unwrap();
        std::fs::write(
            dir.path().join("weather.yml"),
            r#"
title: Weather Bot
model: gpt-4
temperature: 0
prompt:
  - You answer weather questions.
  - "{resource}"
functions: functions.json
resource: facts.txt
actions:
  get_weather:
    url: https://api.example.com/weather/{city}
intro:
  - Ask me about the weather.
skip_function_result: true
"#,
        )
        .unwrap();

        let manifest = Manifest::from_path(&dir.path().join("weather.yml")).unwrap();
        assert_eq!(manifest.name(), "weather");
        assert_eq!(manifest.title(), "Weather Bot");
        assert_eq!(manifest.model().unwrap().model_name, "gpt-4");
        assert_eq!(manifest.functions()[0]["name"], "get_weather");
        assert_eq!(manifest.action("get_weather").unwrap().kind(), ActionKind::Rest);
        assert_eq!(manifest.intro(), Some("Ask me about the weather."));
        assert!(manifest.skip_function_result());
        let prompt = manifest.prompt_text(&PromptContext::default()).unwrap();
        assert_eq!(prompt, "You answer weather questions.\nThe sky is blue.");
    }

    #[test]
    fn missing_resource_is_manifest_error() {
        let err = Manifest::from_value("x", json!({"resource": "nope.txt"}), Path::new("/nonexistent"))
            .unwrap_err();
        assert!(matches!(err, AgentryError::Manifest(_)));
    }

    #[test]
    fn bad_action_fails_load() {
        let err = Manifest::from_value("x", json!({"actions": {"f": {}}}), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, AgentryError::Manifest(ref m) if m.contains("'f'")));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent.txt");
        std::fs::write(&path, "{}").unwrap();
        assert!(Manifest::from_path(&path).is_err());
    }
}
