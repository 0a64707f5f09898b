//! Application layer: agent selection, session lifecycle, emits and
//! scripted runs on top of [`Session`].

pub mod agents;
pub mod command;

pub use agents::{AgentDirectory, AgentSummary};
pub use command::Command;

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::articles::ArticleProvider;
use crate::config::AgentryConfig;
use crate::error::{AgentryError, Result};
use crate::functions::{ActionDispatcher, EmitEvent, ModuleRegistry};
use crate::history::{FileStorage, HistoryBackend};
use crate::manifest::Manifest;
use crate::models::LlmModel;
use crate::provider::{create_backend, LlmBackend};
use crate::sandbox::{CodeSandbox, ProcessSandbox};
use crate::session::{Reply, Session, SessionEventSink};

/// Builds the backend for a model.
pub type BackendFactory =
    Arc<dyn Fn(&LlmModel, &AgentryConfig) -> Result<Arc<dyn LlmBackend>> + Send + Sync>;

/// Builds a fresh sandbox for a notebook session of the named agent.
pub type SandboxFactory =
    Arc<dyn Fn(&str, &AgentryConfig) -> Result<Arc<dyn CodeSandbox>> + Send + Sync>;

pub const EMIT_SWITCH_SESSION: &str = "switch_session";
pub const EMIT_UPDATE_MEMORY: &str = "update_memory";

/// Result of executing a [`Command`].
#[derive(Debug)]
pub enum CommandOutput {
    /// Text for the user.
    Text(String),
    /// Answer to a question; `None` when the turn failed and was reset.
    Reply(Option<Reply>),
    Exit,
}

/// `--autotest` script.
#[derive(Debug, Clone, Deserialize)]
pub struct AutotestScript {
    pub agent: String,
    pub questions: Vec<String>,
}

/// One question and the answer it got.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub question: String,
    pub answer: Option<String>,
}

/// Owns the active session and everything needed to replace it.
pub struct Application {
    config: Arc<AgentryConfig>,
    agents: AgentDirectory,
    modules: Arc<ModuleRegistry>,
    history: HistoryBackend,
    articles: Option<Arc<dyn ArticleProvider>>,
    backends: BackendFactory,
    sandboxes: SandboxFactory,
    events: Option<SessionEventSink>,
    memory: Map<String, Value>,
    session: Option<Session>,
}

impl Application {
    /// Scan the configured agents directory. History is file-backed under
    /// `history_dir`.
    pub fn new(config: AgentryConfig) -> Result<Self> {
        let agents = AgentDirectory::scan(config.agents_dir())?;
        let history = HistoryBackend::File(Arc::new(FileStorage::new(config.history_dir())));
        Ok(Self {
            config: Arc::new(config),
            agents,
            modules: Arc::new(ModuleRegistry::new()),
            history,
            articles: None,
            backends: Arc::new(
                |model: &LlmModel, config: &AgentryConfig| -> Result<Arc<dyn LlmBackend>> {
                    Ok(Arc::from(create_backend(model, config)?))
                },
            ),
            sandboxes: Arc::new(default_sandbox),
            events: None,
            memory: Map::new(),
            session: None,
        })
    }

    pub fn with_modules(mut self, modules: ModuleRegistry) -> Self {
        self.modules = Arc::new(modules);
        self
    }

    pub fn with_history(mut self, history: HistoryBackend) -> Self {
        self.history = history;
        self
    }

    pub fn with_articles(mut self, provider: Arc<dyn ArticleProvider>) -> Self {
        self.articles = Some(provider);
        self
    }

    pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
        self.backends = factory;
        self
    }

    pub fn with_sandbox_factory(mut self, factory: SandboxFactory) -> Self {
        self.sandboxes = factory;
        self
    }

    pub fn with_event_sink(mut self, sink: SessionEventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn config(&self) -> &AgentryConfig {
        &self.config
    }

    pub fn memory(&self) -> &Map<String, Value> {
        &self.memory
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn active(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| AgentryError::InvalidState("no active agent".into()))
    }

    pub fn list_agents(&self) -> Vec<AgentSummary> {
        self.agents.summaries()
    }

    /// Start `agent` in a fresh session, replacing any active one.
    pub async fn open(&mut self, agent: &str) -> Result<&Session> {
        let manifest = self.agents.load(agent)?;
        let session = self.new_session(manifest).await?;
        self.replace(session).await;
        self.active().map(|s| &*s)
    }

    /// Switch to `agent`, carrying the conversation so far: the new
    /// session's presets followed by the old session's non-preset messages.
    pub async fn switch_agent(&mut self, agent: &str) -> Result<()> {
        let manifest = self.agents.load(agent)?;
        let carried = self
            .session
            .as_ref()
            .map(|s| s.history().non_preset_messages())
            .unwrap_or_default();
        let mut session = self.new_session(manifest).await?;
        session.extend(carried)?;
        info!(agent = %agent, "switched agent");
        self.replace(session).await;
        Ok(())
    }

    /// Use another model for the active agent; history is kept.
    pub fn switch_model(&mut self, model: &str) -> Result<()> {
        let model: LlmModel = model.parse()?;
        let backend = (self.backends)(&model, &self.config)?;
        self.active()?.set_backend(backend);
        Ok(())
    }

    /// Replace the active session with a fresh one for the same agent.
    pub async fn reset(&mut self) -> Result<()> {
        let manifest = self
            .session
            .as_ref()
            .map(|s| Arc::clone(s.manifest()))
            .ok_or_else(|| AgentryError::InvalidState("no active agent".into()))?;
        let session = self.new_session(manifest).await?;
        self.replace(session).await;
        Ok(())
    }

    /// Ask the active agent. Emits are applied and may chain into further
    /// questions. A failed turn resets the session; the error is returned
    /// only in verbose mode, otherwise the answer is `None`.
    pub async fn ask(&mut self, question: &str) -> Result<Option<Reply>> {
        let mut question = question.to_string();
        let mut hops = 0;
        loop {
            let reply = match self.active()?.ask(&question).await {
                Ok(reply) => reply,
                Err(err) => return self.recover(err).await,
            };
            let Some(ref emit) = reply.emit else {
                return Ok(Some(reply));
            };
            match self.handle_emit(emit).await? {
                Some(next) if hops < self.config.max_turns() => {
                    hops += 1;
                    question = next;
                }
                Some(_) => {
                    warn!("emit chain limit reached");
                    return Ok(Some(reply));
                }
                None => return Ok(Some(reply)),
            }
        }
    }

    async fn recover(&mut self, err: AgentryError) -> Result<Option<Reply>> {
        error!(error = %err, category = ?err.category(), "turn failed, resetting session");
        if let Err(reset_err) = self.reset().await {
            error!(error = %reset_err, "reset after failure also failed");
        }
        if self.config.verbose() {
            Err(err)
        } else {
            Ok(None)
        }
    }

    /// Apply an emit. Returns a follow-up question when the emit carries
    /// one.
    pub async fn handle_emit(&mut self, event: &EmitEvent) -> Result<Option<String>> {
        match event.method.as_str() {
            EMIT_SWITCH_SESSION => {
                let name = event
                    .data
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AgentryError::InvalidArgument("switch_session needs a name".into())
                    })?
                    .to_string();
                self.switch_agent(&name).await?;
                Ok(event
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .filter(|m| !m.trim().is_empty())
                    .map(str::to_string))
            }
            EMIT_UPDATE_MEMORY => {
                for (key, value) in &event.data {
                    self.memory.insert(key.clone(), value.clone());
                }
                let memory = self.memory.clone();
                self.active()?.set_memory(memory)?;
                Ok(None)
            }
            other => {
                warn!(method = %other, "ignoring unknown emit");
                Ok(None)
            }
        }
    }

    /// Execute one command.
    pub async fn execute(&mut self, command: Command) -> Result<CommandOutput> {
        let text = match command {
            Command::Agents => self
                .list_agents()
                .into_iter()
                .map(|a| match a.description {
                    Some(desc) => format!("{}: {} ({desc})", a.name, a.title),
                    None => format!("{}: {}", a.name, a.title),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Command::Switch(agent) => {
                self.switch_agent(&agent).await?;
                format!("switched to {agent}")
            }
            Command::Model(model) => {
                self.switch_model(&model)?;
                format!("model set to {model}")
            }
            Command::Reset => {
                self.reset().await?;
                "session reset".to_string()
            }
            Command::Sessions => self.sessions()?.join("\n"),
            Command::Load(id) => {
                self.load_session(&id)?;
                format!("loaded session {id}")
            }
            Command::Verbose(value) => {
                let verbose = value.unwrap_or(!self.config.verbose());
                self.set_verbose(verbose);
                format!("verbose {}", if verbose { "on" } else { "off" })
            }
            Command::Exit => return Ok(CommandOutput::Exit),
            Command::Ask(question) => return Ok(CommandOutput::Reply(self.ask(&question).await?)),
        };
        Ok(CommandOutput::Text(text))
    }

    /// Run a comma-separated command list, stopping at the first error.
    pub async fn run_commands(&mut self, list: &str) -> Result<Vec<CommandOutput>> {
        let mut outputs = Vec::new();
        for item in list.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let output = self.execute(Command::parse_item(item)?).await?;
            let exit = matches!(output, CommandOutput::Exit);
            outputs.push(output);
            if exit {
                break;
            }
        }
        Ok(outputs)
    }

    /// Run a YAML or JSON `{agent, questions}` script.
    pub async fn autotest(&mut self, script: &Path) -> Result<Vec<Exchange>> {
        let raw = std::fs::read_to_string(script).map_err(|e| {
            AgentryError::Configuration(format!("cannot read {}: {e}", script.display()))
        })?;
        let script: AutotestScript = serde_yaml::from_str(&raw)?;
        self.open(&script.agent).await?;

        let mut exchanges = Vec::with_capacity(script.questions.len());
        for question in script.questions {
            let reply = self.ask(&question).await?;
            info!(question = %question, "autotest");
            exchanges.push(Exchange {
                answer: reply.and_then(|r| r.text().map(str::to_string)),
                question,
            });
        }
        Ok(exchanges)
    }

    /// Stored sessions of the active agent.
    pub fn sessions(&self) -> Result<Vec<String>> {
        match self.session {
            Some(ref session) => session.list_sessions(),
            None => Ok(Vec::new()),
        }
    }

    pub fn load_session(&mut self, id: &str) -> Result<()> {
        self.active()?.load_session(id)
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        Arc::make_mut(&mut self.config).set_verbose(verbose);
    }

    /// Stop the active session's sandbox.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close().await {
                warn!(error = %err, "closing session failed");
            }
        }
    }

    async fn replace(&mut self, session: Session) {
        if let Some(old) = self.session.replace(session) {
            if let Err(err) = old.close().await {
                warn!(error = %err, "closing previous session failed");
            }
        }
    }

    async fn new_session(&self, manifest: Arc<Manifest>) -> Result<Session> {
        let model = match manifest.model() {
            Some(model) => model.clone(),
            None => self.config.default_model()?,
        };
        let backend = (self.backends)(&model, &self.config)?;

        let mut dispatcher =
            ActionDispatcher::new(Arc::clone(&self.config), Arc::clone(&self.modules))?;
        if manifest.notebook() {
            dispatcher = dispatcher.with_sandbox((self.sandboxes)(manifest.name(), &self.config)?);
        }

        let history = self.history.create(self.config.user_id(), manifest.name());
        let mut session = Session::new(
            Arc::clone(&manifest),
            backend,
            Arc::new(dispatcher),
            history,
            self.config.max_turns(),
        )
        .with_memory(self.memory.clone());
        if let Some(names) = manifest.agents() {
            session = session.with_agents(self.agents.describe(names));
        }
        if let Some(ref articles) = self.articles {
            session = session.with_articles(Arc::clone(articles));
        }
        if let Some(ref sink) = self.events {
            session = session.with_event_sink(Arc::clone(sink));
        }
        session.start().await
    }
}

fn default_sandbox(agent: &str, config: &AgentryConfig) -> Result<Arc<dyn CodeSandbox>> {
    let dir = config
        .history_dir()
        .join("notebooks")
        .join(uuid::Uuid::new_v4().simple().to_string());
    info!(agent = %agent, dir = %dir.display(), "notebook sandbox");
    Ok(Arc::new(ProcessSandbox::new(dir, config.code_timeout())))
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("agents", &self.agents.names().collect::<Vec<_>>())
            .field("session", &self.session)
            .finish()
    }
}
