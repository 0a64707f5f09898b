//! Action descriptors: what a manifest function name is bound to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::error::AgentryError;

/// HTTP verb for REST actions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Endpoint description shared by REST and GraphQL actions.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpAction {
    pub url: String,
    pub method: HttpMethod,
    /// Header name to value template.
    pub headers: BTreeMap<String, String>,
    /// Name of the secret substituted for `{appkey}` in header templates.
    pub appkey: Option<String>,
}

/// The concrete handler bound to a function name.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDescriptor {
    Rest(HttpAction),
    GraphQl(HttpAction),
    DataUrlTemplate {
        template: PathBuf,
        mime_type: String,
        /// Rendered with the arguments plus `{url}`.
        message: String,
    },
    MessageTemplate {
        message: String,
    },
    Emit {
        method: String,
        /// Field name to value template.
        data: Map<String, Value>,
    },
}

impl ActionDescriptor {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Rest(_) => ActionKind::Rest,
            Self::GraphQl(_) => ActionKind::Graphql,
            Self::DataUrlTemplate { .. } => ActionKind::DataUrl,
            Self::MessageTemplate { .. } => ActionKind::Message,
            Self::Emit { .. } => ActionKind::Emit,
        }
    }
}

/// Explicit `type` values accepted in a manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Rest,
    #[serde(alias = "graphQL")]
    Graphql,
    #[serde(alias = "template", alias = "data_url_template")]
    DataUrl,
    #[serde(alias = "message_template")]
    Message,
    Emit,
}

/// Action as written in a manifest, before classification.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawAction {
    #[serde(rename = "type")]
    kind: Option<ActionKind>,
    url: Option<String>,
    method: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    appkey: Option<String>,
    #[serde(rename = "graphQL", alias = "graphql", default)]
    graphql: bool,
    template: Option<String>,
    mime_type: Option<String>,
    message: Option<String>,
    emit_method: Option<String>,
    #[serde(default)]
    emit_data: Map<String, Value>,
}

impl RawAction {
    /// Classify into a descriptor. An explicit `type` wins; otherwise the
    /// variant is inferred from which fields are present.
    pub(crate) fn classify(
        self,
        name: &str,
        base_dir: &Path,
    ) -> Result<ActionDescriptor, AgentryError> {
        let kind = match self.kind {
            Some(kind) => kind,
            None if self.url.is_some() && self.graphql => ActionKind::Graphql,
            None if self.url.is_some() => ActionKind::Rest,
            None if self.template.is_some() => ActionKind::DataUrl,
            None if self.message.is_some() => ActionKind::Message,
            None if self.emit_method.is_some() => ActionKind::Emit,
            None => {
                return Err(AgentryError::Manifest(format!(
                    "action '{name}' has no recognizable type"
                )))
            }
        };

        let missing = |field: &str| {
            AgentryError::Manifest(format!("{kind} action '{name}' requires '{field}'"))
        };

        Ok(match kind {
            ActionKind::Rest | ActionKind::Graphql => {
                let method = match self.method.as_deref() {
                    None => HttpMethod::default(),
                    Some(m) => m.parse().map_err(|_| {
                        AgentryError::Manifest(format!(
                            "action '{name}' has unsupported method '{m}'"
                        ))
                    })?,
                };
                let http = HttpAction {
                    url: self.url.ok_or_else(|| missing("url"))?,
                    method,
                    headers: self.headers,
                    appkey: self.appkey,
                };
                if kind == ActionKind::Rest {
                    ActionDescriptor::Rest(http)
                } else {
                    ActionDescriptor::GraphQl(http)
                }
            }
            ActionKind::DataUrl => ActionDescriptor::DataUrlTemplate {
                template: base_dir.join(self.template.ok_or_else(|| missing("template"))?),
                mime_type: self.mime_type.unwrap_or_else(|| "text/plain".to_string()),
                message: self.message.unwrap_or_else(|| "{url}".to_string()),
            },
            ActionKind::Message => ActionDescriptor::MessageTemplate {
                message: self.message.ok_or_else(|| missing("message"))?,
            },
            ActionKind::Emit => ActionDescriptor::Emit {
                method: self.emit_method.ok_or_else(|| missing("emit_method"))?,
                data: self.emit_data,
            },
        })
    }
}
