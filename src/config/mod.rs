//! Configuration (layered: code > env > config file).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::Deserialize;

use crate::error::{AgentryError, Result};
use crate::models::{EngineKind, LlmModel, DEFAULT_MODEL};

const DEFAULT_MAX_TURNS: usize = 8;
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CODE_TIMEOUT: Duration = Duration::from_secs(60);

/// Process configuration, built once and shared read-only between sessions.
///
/// Resolution order for every value:
/// 1. Explicit setters / builder fields
/// 2. Environment variables (`.env` is loaded first when present)
/// 3. The TOML config file
#[derive(Clone, Builder)]
pub struct AgentryConfig {
    #[builder(default)]
    secrets: HashMap<String, String>,
    #[builder(default)]
    base_urls: HashMap<String, String>,
    #[builder(default = DEFAULT_MODEL.to_string(), into)]
    default_model: String,
    #[builder(default = DEFAULT_MAX_TURNS)]
    max_turns: usize,
    #[builder(default = DEFAULT_LLM_TIMEOUT)]
    llm_timeout: Duration,
    #[builder(default = DEFAULT_HTTP_TIMEOUT)]
    http_timeout: Duration,
    #[builder(default = DEFAULT_CODE_TIMEOUT)]
    code_timeout: Duration,
    #[builder(default)]
    verbose: bool,
    #[builder(default = PathBuf::from("agents"), into)]
    agents_dir: PathBuf,
    #[builder(default = default_data_dir().join("history"), into)]
    history_dir: PathBuf,
    #[builder(into)]
    log_dir: Option<PathBuf>,
    #[builder(default = "default".to_string(), into)]
    user_id: String,
}

impl fmt::Debug for AgentryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secret_names: Vec<_> = self.secrets.keys().collect();
        secret_names.sort();
        f.debug_struct("AgentryConfig")
            .field("secrets", &secret_names)
            .field("base_urls", &self.base_urls)
            .field("default_model", &self.default_model)
            .field("max_turns", &self.max_turns)
            .field("llm_timeout", &self.llm_timeout)
            .field("http_timeout", &self.http_timeout)
            .field("code_timeout", &self.code_timeout)
            .field("verbose", &self.verbose)
            .field("agents_dir", &self.agents_dir)
            .field("history_dir", &self.history_dir)
            .field("log_dir", &self.log_dir)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Default for AgentryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// On-disk shape of `agentry.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    secrets: HashMap<String, String>,
    base_urls: HashMap<String, String>,
    default_model: Option<String>,
    max_turns: Option<usize>,
    llm_timeout_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    code_timeout_secs: Option<u64>,
    verbose: Option<bool>,
    agents_dir: Option<PathBuf>,
    history_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    user_id: Option<String>,
}

impl AgentryConfig {
    /// Load from the environment only.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        config.apply_env(std::env::vars());
        config
    }

    /// Load the config file (explicit path, or the default location when it
    /// exists), then overlay the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        let path = path.map(Path::to_path_buf).or_else(|| {
            let default = default_config_path();
            default.exists().then_some(default)
        });
        if let Some(path) = path {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                AgentryError::Configuration(format!("cannot read {}: {e}", path.display()))
            })?;
            config.apply_file(&raw)?;
        }
        config.apply_env(std::env::vars());
        Ok(config)
    }

    fn apply_file(&mut self, raw: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(raw)
            .map_err(|e| AgentryError::Configuration(format!("invalid config file: {e}")))?;
        self.secrets.extend(file.secrets);
        self.base_urls.extend(file.base_urls);
        if let Some(model) = file.default_model {
            self.default_model = model;
        }
        if let Some(turns) = file.max_turns {
            self.max_turns = turns;
        }
        if let Some(secs) = file.llm_timeout_secs {
            self.llm_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.http_timeout_secs {
            self.http_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.code_timeout_secs {
            self.code_timeout = Duration::from_secs(secs);
        }
        if let Some(verbose) = file.verbose {
            self.verbose = verbose;
        }
        if let Some(dir) = file.agents_dir {
            self.agents_dir = dir;
        }
        if let Some(dir) = file.history_dir {
            self.history_dir = dir;
        }
        if file.log_dir.is_some() {
            self.log_dir = file.log_dir;
        }
        if let Some(user) = file.user_id {
            self.user_id = user;
        }
        Ok(())
    }

    /// Every variable becomes a named secret; a few are also settings.
    fn apply_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            match key.as_str() {
                "OPENAI_BASE_URL" => {
                    self.base_urls.insert(EngineKind::OpenAi.to_string(), value.clone());
                }
                "OPENAI_COMPAT_BASE_URL" => {
                    self.base_urls
                        .insert(EngineKind::OpenAiCompatible.to_string(), value.clone());
                }
                "AGENTRY_MODEL" => self.default_model = value.clone(),
                "AGENTRY_MAX_TURNS" => match value.parse() {
                    Ok(turns) => self.max_turns = turns,
                    Err(_) => tracing::warn!(value = %value, "ignoring invalid AGENTRY_MAX_TURNS"),
                },
                "AGENTRY_AGENTS_DIR" => self.agents_dir = PathBuf::from(&value),
                "AGENTRY_HISTORY_DIR" => self.history_dir = PathBuf::from(&value),
                "AGENTRY_LOG_DIR" => self.log_dir = Some(PathBuf::from(&value)),
                _ => {}
            }
            self.secrets.insert(key, value);
        }
    }

    /// Look up a named secret.
    pub fn secret(&self, name: &str) -> Option<&str> {
        self.secrets.get(name).map(String::as_str)
    }

    pub fn set_secret(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.insert(name.into(), value.into());
    }

    pub fn base_url(&self, engine: EngineKind) -> Option<&str> {
        self.base_urls.get(&engine.to_string()).map(String::as_str)
    }

    pub fn set_base_url(&mut self, engine: EngineKind, url: impl Into<String>) {
        self.base_urls.insert(engine.to_string(), url.into());
    }

    /// The model used by manifests that do not name one.
    pub fn default_model(&self) -> Result<LlmModel> {
        self.default_model.parse()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn set_max_turns(&mut self, turns: usize) {
        self.max_turns = turns;
    }

    pub fn llm_timeout(&self) -> Duration {
        self.llm_timeout
    }

    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    pub fn code_timeout(&self) -> Duration {
        self.code_timeout
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn agents_dir(&self) -> &Path {
        &self.agents_dir
    }

    pub fn set_agents_dir(&mut self, dir: impl Into<PathBuf>) {
        self.agents_dir = dir.into();
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn set_user_id(&mut self, user: impl Into<String>) {
        self.user_id = user.into();
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "agentry")
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".agentry"))
}

fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().join("agentry.toml"))
        .unwrap_or_else(|| PathBuf::from("agentry.toml"))
}
