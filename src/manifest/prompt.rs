//! System prompt rendering.

use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::functions::template::substitute;

use super::Manifest;

/// Values supplied by the session and application at render time.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// Rendered list of agents this agent can hand off to.
    pub agents: Option<String>,
    /// Shared session memory.
    pub memory: Option<Map<String, Value>>,
    /// Articles related to the current question.
    pub articles: Option<String>,
}

impl Manifest {
    /// Render the system prompt, or `None` when the manifest has none.
    ///
    /// Substitutions: `{random}` (one entry of `list`), `{resource}`,
    /// `{now}`, `{agents}`, `{memory}`, `{articles}`. Placeholders whose
    /// value is unavailable are left untouched.
    pub fn prompt_text(&self, ctx: &PromptContext) -> Option<String> {
        let mut text = self.prompt.clone()?;

        if let Some(sample) = self.samples.choose(&mut rand::thread_rng()) {
            text = substitute(&text, "random", sample);
        }
        if let Some(ref resource) = self.resource {
            text = substitute(&text, "resource", resource);
        }
        text = substitute(&text, "now", &Utc::now().to_rfc3339());
        if let Some(ref agents) = ctx.agents {
            text = substitute(&text, "agents", agents);
        }
        if let Some(ref memory) = ctx.memory {
            let rendered = serde_json::to_string(memory).unwrap_or_else(|_| "{}".to_string());
            text = substitute(&text, "memory", &rendered);
        }
        if let Some(ref articles) = ctx.articles {
            text = substitute(&text, "articles", articles);
        }
        Some(text)
    }

    /// Apply the `form` template to a user question.
    pub fn format_question(&self, question: &str) -> Result<String> {
        match self.form() {
            None => Ok(question.to_string()),
            Some(form) => crate::functions::template::render_with(form, |key| {
                (key == "question").then(|| question.to_string())
            }),
        }
    }

    /// Apply the `result_form` template to a function result.
    pub fn format_result(&self, result: &str) -> Result<String> {
        match self.result_form() {
            None => Ok(result.to_string()),
            Some(form) => crate::functions::template::render_with(form, |key| {
                (key == "result").then(|| result.to_string())
            }),
        }
    }
}
