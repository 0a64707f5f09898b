//! A running conversation with one agent.
//!
//! The [`Session`] owns its history, its manifest and its backend handle.
//! [`Session::ask`] appends the question and drives the conversation loop:
//! call the model, append any text, dispatch any function call, and call
//! the model again while the dispatcher asks for it, up to `max_turns`
//! model invocations per question.

pub mod events;
pub mod state;

pub use events::{SessionEvent, SessionEventPayload, SessionEventSink};
pub use state::{LoopState, Reply};

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::articles::ArticleProvider;
use crate::error::{AgentryError, Result};
use crate::functions::{
    ActionDispatcher, DispatchOutcome, FunctionCallParser, FunctionContext,
};
use crate::history::HistoryStore;
use crate::manifest::{Manifest, PromptContext};
use crate::provider::{LlmBackend, LlmRequest};
use crate::types::{Message, Role};
use events::SessionEventEmitter;

const DEFAULT_ARTICLE_BUDGET: usize = 2000;

/// One agent conversation.
pub struct Session {
    id: Uuid,
    manifest: Arc<Manifest>,
    backend: Arc<dyn LlmBackend>,
    dispatcher: Arc<ActionDispatcher>,
    history: Box<dyn HistoryStore>,
    state: LoopState,
    max_turns: usize,
    prompt_ctx: PromptContext,
    articles: Option<Arc<dyn ArticleProvider>>,
    intro: Option<String>,
    cancel: CancellationToken,
    events: SessionEventEmitter,
}

impl Session {
    /// Create a session and seed its preset messages (system prompt and
    /// intro) when `history` is empty.
    pub fn new(
        manifest: Arc<Manifest>,
        backend: Arc<dyn LlmBackend>,
        dispatcher: Arc<ActionDispatcher>,
        history: Box<dyn HistoryStore>,
        max_turns: usize,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            manifest,
            backend,
            dispatcher,
            history,
            state: LoopState::Idle,
            max_turns: max_turns.max(1),
            prompt_ctx: PromptContext::default(),
            articles: None,
            intro: None,
            cancel: CancellationToken::new(),
            events: SessionEventEmitter::new(id, None),
        }
    }

    pub fn with_agents(mut self, agents: impl Into<String>) -> Self {
        self.prompt_ctx.agents = Some(agents.into());
        self
    }

    pub fn with_memory(mut self, memory: Map<String, Value>) -> Self {
        self.prompt_ctx.memory = Some(memory);
        self
    }

    pub fn with_articles(mut self, provider: Arc<dyn ArticleProvider>) -> Self {
        self.articles = Some(provider);
        self
    }

    pub fn with_event_sink(mut self, sink: SessionEventSink) -> Self {
        self.events.set_sink(sink);
        self
    }

    /// Seed presets and, for notebook agents, prepare the sandbox notebook.
    pub async fn start(mut self) -> Result<Self> {
        if self.history.is_empty() {
            if let Some(prompt) = self.manifest.prompt_text(&self.prompt_ctx) {
                self.history.append(Message::system(prompt).into_preset())?;
            }
            if let Some(intro) = self.manifest.intro() {
                let intro = intro.to_string();
                self.history
                    .append(Message::assistant(intro.clone()).into_preset())?;
                self.intro = Some(intro);
            }
        }

        if self.manifest.notebook() {
            if let Some(sandbox) = self.dispatcher.sandbox() {
                let info = sandbox
                    .create_notebook(&self.backend.model().model_name)
                    .await?;
                info!(notebook = %info.notebook_name, "{}", info.summary);
            }
        }
        debug!(agent = %self.manifest.name(), session = %self.id, "session started");
        Ok(self)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn backend(&self) -> &Arc<dyn LlmBackend> {
        &self.backend
    }

    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The intro line shown when the session opened.
    pub fn intro(&self) -> Option<&str> {
        self.intro.as_deref()
    }

    /// Token that aborts in-flight model and action calls.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Swap the model backend; history is kept.
    pub fn set_backend(&mut self, backend: Arc<dyn LlmBackend>) {
        info!(agent = %self.manifest.name(), model = %backend.model(), "model switched");
        self.backend = backend;
    }

    /// Append messages without running the loop.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> Result<()> {
        for message in messages {
            self.history.append(message)?;
        }
        Ok(())
    }

    /// Replace shared memory and re-render the system prompt.
    pub fn set_memory(&mut self, memory: Map<String, Value>) -> Result<()> {
        self.prompt_ctx.memory = Some(memory);
        self.rewrite_prompt()
    }

    /// Replace the history with a stored session.
    pub fn load_session(&mut self, id: &str) -> Result<()> {
        self.history.load_session(id)?;
        self.state = LoopState::Idle;
        Ok(())
    }

    pub fn list_sessions(&self) -> Result<Vec<String>> {
        self.history.list_sessions()
    }

    /// Stop the notebook sandbox, if any.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        if self.manifest.notebook() {
            if let Some(sandbox) = self.dispatcher.sandbox() {
                sandbox.stop().await?;
            }
        }
        Ok(())
    }

    /// Ask a question and run the loop until it settles.
    ///
    /// Errors from the model call or from history persistence leave the
    /// session in [`LoopState::Failed`]; the caller is expected to replace
    /// it with a fresh session.
    pub async fn ask(&mut self, question: &str) -> Result<Reply> {
        if !self.state.accepts_question() {
            return Err(AgentryError::InvalidState(format!(
                "session is {}, cannot accept a question",
                self.state
            )));
        }
        match self.run_loop(question).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                error!(agent = %self.manifest.name(), error = %err, "conversation loop failed");
                self.transition(LoopState::Failed);
                self.events.emit(SessionEventPayload::Failed {
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_loop(&mut self, question: &str) -> Result<Reply> {
        let text = self.manifest.format_question(question)?;
        if self.manifest.uses_articles() {
            self.refresh_articles(question).await?;
        }

        self.append(Message::user(text.clone()), None)?;
        self.transition(LoopState::AwaitingModel);

        let mut reply = Reply::new();
        let ctx = FunctionContext {
            agent: self.manifest.name().to_string(),
            query: Some(text.clone()),
        };

        loop {
            if reply.turns >= self.max_turns {
                warn!(
                    agent = %self.manifest.name(),
                    turns = reply.turns,
                    "turn limit reached, stopping"
                );
                reply.turn_limit_reached = true;
                break;
            }
            reply.turns += 1;

            let request = self.request();
            debug!(agent = %self.manifest.name(), turn = reply.turns, messages = request.messages.len(), "calling model");
            let response = self.backend.generate(&request, &self.cancel).await?;

            if let Some(text) = response.non_empty_text() {
                self.append(Message::assistant(text), Some(&mut reply))?;
            }

            let parser = FunctionCallParser::new(&self.manifest, self.backend.code_extraction());
            let Some(call) = parser.parse(&response, Some(text.as_str())) else {
                break;
            };

            self.transition(LoopState::DispatchingFunction);
            self.events
                .emit(SessionEventPayload::FunctionStarted { call: call.clone() });
            let outcome = self
                .dispatcher
                .dispatch(&self.manifest, &call, &ctx, &self.cancel)
                .await;
            self.events.emit(SessionEventPayload::FunctionFinished {
                name: call.name.clone(),
                call_again: outcome.call_again(),
            });

            match outcome {
                DispatchOutcome::Completed {
                    echo,
                    result,
                    call_again,
                } => {
                    if let Some(echo) = echo {
                        self.append(echo, Some(&mut reply))?;
                    }
                    self.append(result, Some(&mut reply))?;
                    if !call_again {
                        break;
                    }
                    self.transition(LoopState::AwaitingModel);
                }
                DispatchOutcome::Emitted(event) => {
                    self.events.emit(SessionEventPayload::Emitted {
                        method: event.method.clone(),
                        data: event.data.clone(),
                    });
                    reply.emit = Some(event);
                    break;
                }
                DispatchOutcome::Failed { .. } => break,
            }
        }

        self.transition(LoopState::Done);
        self.history.checkpoint()?;
        Ok(reply)
    }

    fn request(&self) -> LlmRequest {
        let functions = self.manifest.functions();
        LlmRequest {
            messages: self.history.all_messages().to_vec(),
            functions: (!functions.is_empty()).then(|| functions.to_vec()),
            temperature: self.manifest.temperature(),
            max_tokens: Some(self.backend.model().max_token),
        }
    }

    fn append(&mut self, message: Message, reply: Option<&mut Reply>) -> Result<()> {
        self.history.append(message.clone())?;
        self.events.emit(SessionEventPayload::MessageAppended {
            message: message.clone(),
        });
        if let Some(reply) = reply {
            reply.messages.push(message);
        }
        Ok(())
    }

    fn transition(&mut self, to: LoopState) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        debug!(agent = %self.manifest.name(), %from, %to, "state");
        self.events
            .emit(SessionEventPayload::StateChanged { from, to });
    }

    async fn refresh_articles(&mut self, question: &str) -> Result<()> {
        let Some(provider) = self.articles.clone() else {
            return Ok(());
        };
        let budget = self
            .manifest
            .embeddings()
            .map(|e| e.max_tokens)
            .unwrap_or(DEFAULT_ARTICLE_BUDGET);
        let articles = provider.related_articles(question, budget).await?;
        self.prompt_ctx.articles = Some(articles);
        self.rewrite_prompt()
    }

    /// Re-render the system prompt into message 0.
    fn rewrite_prompt(&mut self) -> Result<()> {
        let Some(prompt) = self.manifest.prompt_text(&self.prompt_ctx) else {
            return Ok(());
        };
        match self.history.get(0) {
            Some(first) if first.role == Role::System => {
                self.history.set(0, Message::system(prompt).into_preset())
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("agent", &self.manifest.name())
            .field("model", &self.backend.model().to_string())
            .field("state", &self.state)
            .field("messages", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentryConfig;
    use crate::functions::ModuleRegistry;
    use crate::history::InMemoryHistory;
    use crate::models::{EngineKind, LlmModel};
    use crate::provider::LlmResponse;
    use crate::types::FunctionCall;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    struct Scripted {
        model: LlmModel,
        replies: Mutex<VecDeque<Result<LlmResponse>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<LlmResponse>>) -> Arc<Self> {
            Arc::new(Self {
                model: LlmModel::new(EngineKind::OpenAi, "gpt-4o"),
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for Scripted {
        fn model(&self) -> &LlmModel {
            &self.model
        }

        async fn generate(
            &self,
            request: &LlmRequest,
            _cancel: &CancellationToken,
        ) -> Result<LlmResponse> {
            self.seen.lock().unwrap().push(request.messages.len());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LlmResponse::text("fallback")))
        }
    }

    async fn session(manifest: Value, backend: Arc<Scripted>, max_turns: usize) -> Session {
        let manifest = Arc::new(Manifest::from_value("test", manifest, Path::new(".")).unwrap());
        let dispatcher = Arc::new(
            ActionDispatcher::new(
                Arc::new(AgentryConfig::default()),
                Arc::new(ModuleRegistry::new()),
            )
            .unwrap(),
        );
        Session::new(
            manifest,
            backend,
            dispatcher,
            Box::new(InMemoryHistory::new("test")),
            max_turns,
        )
        .start()
        .await
        .unwrap()
    }

    fn greet_call() -> LlmResponse {
        LlmResponse::function_call(FunctionCall::new("greet", json!("{\"name\": \"Ada\"}")))
    }

    #[tokio::test]
    async fn plain_answer_ends_done() {
        let backend = Scripted::new(vec![Ok(LlmResponse::text("Hello!"))]);
        let mut s = session(json!({"prompt": "Be nice."}), backend, 8).await;
        let reply = s.ask("hi").await.unwrap();
        assert_eq!(reply.text(), Some("Hello!"));
        assert_eq!(reply.turns, 1);
        assert_eq!(s.state(), LoopState::Done);
        // system, user, assistant
        assert_eq!(s.history().len(), 3);
        assert!(s.history().get(0).unwrap().preset);
    }

    #[tokio::test]
    async fn function_result_reinvokes_model() {
        let backend = Scripted::new(vec![Ok(greet_call()), Ok(LlmResponse::text("Done."))]);
        let mut s = session(
            json!({"actions": {"greet": {"message": "Hello, {name}!"}}}),
            Arc::clone(&backend),
            8,
        )
        .await;
        let reply = s.ask("greet Ada").await.unwrap();
        assert_eq!(reply.turns, 2);
        let result = reply.function_results().next().unwrap();
        assert_eq!(result.content, "Hello, Ada!");
        assert_eq!(reply.text(), Some("Done."));
        // Second call saw user + function message.
        assert_eq!(*backend.seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn text_and_call_both_recorded() {
        let mut response = greet_call();
        response.text = Some("Let me greet.".into());
        let backend = Scripted::new(vec![Ok(response)]);
        let mut s = session(
            json!({
                "skip_function_result": true,
                "actions": {"greet": {"message": "Hello, {name}!"}}
            }),
            backend,
            8,
        )
        .await;
        let reply = s.ask("greet").await.unwrap();
        let roles: Vec<_> = reply.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::Function]);
        assert_eq!(reply.turns, 1);
        assert_eq!(s.state(), LoopState::Done);
    }

    #[tokio::test]
    async fn turn_limit_stops_runaway_calls() {
        let backend = Scripted::new((0..10).map(|_| Ok(greet_call())).collect());
        let mut s = session(
            json!({"actions": {"greet": {"message": "again"}}}),
            backend,
            3,
        )
        .await;
        let reply = s.ask("loop").await.unwrap();
        assert!(reply.turn_limit_reached);
        assert_eq!(reply.turns, 3);
        assert_eq!(reply.function_results().count(), 3);
        assert_eq!(s.state(), LoopState::Done);
    }

    #[tokio::test]
    async fn unknown_function_stops_without_result() {
        let backend = Scripted::new(vec![Ok(LlmResponse::function_call(FunctionCall::new(
            "missing",
            json!({}),
        )))]);
        let mut s = session(json!({}), backend, 8).await;
        let reply = s.ask("x").await.unwrap();
        assert!(reply.messages.is_empty());
        assert_eq!(s.state(), LoopState::Done);
    }

    #[tokio::test]
    async fn emit_is_returned_to_caller() {
        let backend = Scripted::new(vec![Ok(LlmResponse::function_call(FunctionCall::new(
            "handoff",
            json!({"agent": "chef"}),
        )))]);
        let mut s = session(
            json!({"actions": {"handoff": {
                "emit_method": "switch_session",
                "emit_data": {"name": "{agent}"}
            }}}),
            backend,
            8,
        )
        .await;
        let reply = s.ask("cook").await.unwrap();
        assert_eq!(reply.function_results().count(), 0);
        let emit = reply.emit.unwrap();
        assert_eq!(emit.method, "switch_session");
        assert_eq!(emit.data["name"], "chef");
    }

    #[tokio::test]
    async fn model_error_fails_session() {
        let backend = Scripted::new(vec![Err(AgentryError::api(500, "boom"))]);
        let mut s = session(json!({}), backend, 8).await;
        assert!(s.ask("x").await.is_err());
        assert_eq!(s.state(), LoopState::Failed);
        assert!(matches!(
            s.ask("again").await,
            Err(AgentryError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn memory_rewrites_system_prompt() {
        let backend = Scripted::new(vec![]);
        let mut s = session(json!({"prompt": "Memory: {memory}"}), backend, 8).await;
        assert_eq!(s.history().get(0).unwrap().content, "Memory: {memory}");
        let mut memory = Map::new();
        memory.insert("name".into(), json!("Ada"));
        s.set_memory(memory).unwrap();
        assert_eq!(
            s.history().get(0).unwrap().content,
            "Memory: {\"name\":\"Ada\"}"
        );
    }

    #[tokio::test]
    async fn intro_is_preset_assistant_message() {
        let backend = Scripted::new(vec![]);
        let s = session(json!({"intro": ["Welcome!"]}), backend, 8).await;
        assert_eq!(s.intro(), Some("Welcome!"));
        let first = s.history().get(0).unwrap();
        assert_eq!(first.role, Role::Assistant);
        assert!(first.preset);
    }

    #[tokio::test]
    async fn events_trace_state_machine() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let backend = Scripted::new(vec![Ok(greet_call()), Ok(LlmResponse::text("ok"))]);
        let mut s = session(
            json!({"actions": {"greet": {"message": "hi {name}"}}}),
            backend,
            8,
        )
        .await
        .with_event_sink(Arc::new(move |event: SessionEvent| {
            if let SessionEventPayload::StateChanged { to, .. } = event.payload {
                sink_seen.lock().unwrap().push(to);
            }
        }));
        s.ask("go").await.unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                LoopState::AwaitingModel,
                LoopState::DispatchingFunction,
                LoopState::AwaitingModel,
                LoopState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn articles_rewrite_message_zero_each_question() {
        let backend = Scripted::new(vec![
            Ok(LlmResponse::text("Tokyo is humid.")),
            Ok(LlmResponse::text("Ownership moves values.")),
        ]);
        let articles = crate::articles::ArticleList::new([
            "Tokyo weather is humid in summer.",
            "Rust ownership rules.",
        ]);
        let mut s = session(
            json!({
                "prompt": "Context: {articles}",
                "embeddings": {"name": "notes"}
            }),
            backend,
            8,
        )
        .await
        .with_articles(Arc::new(articles));

        s.ask("Tokyo weather?").await.unwrap();
        assert_eq!(
            s.history().get(0).unwrap().content,
            "Context: Tokyo weather is humid in summer."
        );

        s.ask("What are the ownership rules?").await.unwrap();
        let messages = s.history().all_messages();
        assert_eq!(messages.iter().filter(|m| m.role == Role::System).count(), 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "Context: Rust ownership rules.");
        assert!(messages[0].preset);
        // system plus two question/answer pairs
        assert_eq!(messages.len(), 5);
    }

    #[tokio::test]
    async fn code_query_is_the_formatted_user_message() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink_calls = Arc::clone(&calls);
        let backend = Scripted::new(vec![Ok(LlmResponse::text(
            "```python\nprint(2 + 2)\n```",
        ))]);
        let mut s = session(
            json!({"notebook": true, "form": "Task: {question}"}),
            backend,
            8,
        )
        .await
        .with_event_sink(Arc::new(move |event: SessionEvent| {
            if let SessionEventPayload::FunctionStarted { call } = event.payload {
                sink_calls.lock().unwrap().push(call);
            }
        }));

        s.ask("add numbers").await.unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "run_python_code");
        assert_eq!(calls[0].arguments["query"], "Task: add numbers");
        assert_eq!(s.history().get(0).unwrap().content, "Task: add numbers");
    }
}
