//! Turn Orchestrator
//!
//! Drives one user turn through the model/tool loop:
//!
//! ```text
//! BuildRequest ──> StreamModel ──┬─ tool calls ──> DispatchTools ──> BuildRequest
//!                                └─ none ───────> CheckPending ──┬─ images ─> BuildRequest
//!                                                                └─ empty ──> Finished
//! ```
//!
//! The orchestrator keeps its own accumulated history and only ever sends it
//! to the provider. Binary tool output is never placed in a tool turn: it is
//! queued and delivered in one synthesized user turn once the model stops
//! calling tools.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attachment::{AttachmentRequest, AttachmentResolver, parse_manifest};
use crate::conversation::{Conversation, ConversationId, ConversationStore};
use crate::error::{AgentError, Result};
use crate::event::{AgentEvent, EventEmitter};
use crate::message::{BinaryData, Part, Role, Turn, consistent_prefix_len};
use crate::provider::{GenerationOptions, LlmProvider, ModelFragment, ModelRequest, ReasoningMode};
use crate::tool::{ToolCall, ToolContext, ToolRegistry};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools \
when they help answer the user, then summarize what you did.";

const IMAGE_FOLLOW_UP: &str = "Here are the images produced by the tool calls above.";

const TITLE_PROMPT: &str = "Write a short title (at most six words) for this conversation. \
Reply with the title only, no quotes or punctuation at the end.";

/// Leading turns considered for title generation
const TITLE_CONTEXT_TURNS: usize = 4;

/// Maximum title length in characters
const TITLE_MAX_CHARS: usize = 60;

/// One request from the caller
#[derive(Clone, Debug, Default)]
pub struct TurnRequest {
    pub conversation_id: ConversationId,

    /// Grouping key applied when the conversation is first created
    pub group_id: Option<String>,

    pub message: String,

    /// Entity the user currently has open
    pub active_entity_id: Option<String>,

    pub attachments: AttachmentRequest,

    pub reasoning: ReasoningMode,
}

impl TurnRequest {
    pub fn new(conversation_id: ConversationId, message: impl Into<String>) -> Self {
        Self {
            conversation_id,
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Produces the contextual state injected ahead of the user's message.
///
/// Called once per model round so tool-caused changes are visible on the
/// next exchange.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn build_context(&self, active_entity_id: Option<&str>) -> Option<String>;
}

/// Context provider that injects nothing
pub struct NoContext;

#[async_trait]
impl ContextProvider for NoContext {
    async fn build_context(&self, _active_entity_id: Option<&str>) -> Option<String> {
        None
    }
}

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// System instruction sent with every round
    pub system_prompt: String,

    /// Maximum model rounds per turn before giving up
    pub max_iterations: usize,

    /// Budget for one model round (send + full stream)
    pub round_timeout: Duration,

    /// Generation options; reasoning mode is overridden per request
    pub generation: GenerationOptions,

    /// Whether to title new conversations after the first exchange
    pub generate_titles: bool,

    /// Event channel capacity for `run_stream`
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 12,
            round_timeout: Duration::from_secs(180),
            generation: GenerationOptions::default(),
            generate_titles: true,
            event_buffer: 128,
        }
    }
}

/// How a turn ended for the caller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
}

enum LoopState {
    BuildRequest,
    StreamModel(ModelRequest),
    DispatchTools(Vec<ToolCall>),
    CheckPending,
}

enum LoopOutcome {
    Finished,
    Failed(AgentError),
    Aborted,
}

/// Per-turn data threaded through the loop
struct TurnScope<'a> {
    emitter: &'a EventEmitter,
    tool_ctx: ToolContext,
    user_turn_index: usize,
    reasoning: ReasoningMode,
}

/// The turn loop, shared across requests
#[derive(Clone)]
pub struct TurnOrchestrator {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    resolver: Arc<AttachmentResolver>,
    context: Arc<dyn ContextProvider>,
    config: OrchestratorConfig,
}

impl TurnOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the turn on a background task, returning the event receiver.
    ///
    /// Dropping the receiver cancels the turn at its next checkpoint.
    pub fn run_stream(&self, request: TurnRequest, cancel: CancellationToken) -> mpsc::Receiver<AgentEvent> {
        self.run_stream_holding(request, cancel, ())
    }

    /// Like `run_stream`, keeping `guard` alive until the task has saved
    /// the conversation, even when the receiver was dropped early. The
    /// guard is released before the event stream closes.
    pub fn run_stream_holding<G: Send + 'static>(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
        guard: G,
    ) -> mpsc::Receiver<AgentEvent> {
        let (emitter, rx) = EventEmitter::channel(self.config.event_buffer, cancel);
        let orchestrator = self.clone();

        tokio::spawn(async move {
            let id = request.conversation_id.clone();
            if let Err(e) = orchestrator.run(request, &emitter).await {
                debug!(conversation_id = %id, error = %e, "Turn ended with error");
            }
            drop(guard);
            drop(emitter);
        });

        rx
    }

    /// Process one user turn to completion, emitting events as it goes.
    ///
    /// Failures are reported as an `error` event followed by `done`, and
    /// returned. A cancelled turn emits nothing further and saves only the
    /// part of its history that can be replayed.
    pub async fn run(&self, request: TurnRequest, emitter: &EventEmitter) -> Result<TurnOutcome> {
        let id = request.conversation_id.clone();

        let mut conversation = match self.store.load_or_create(&id).await {
            Ok(conversation) => conversation,
            Err(e) => return Err(self.fail(emitter, &id, e).await),
        };
        if conversation.group_id.is_none() {
            conversation.group_id = request.group_id.clone();
        }

        let resolved = self.resolver.resolve(&request.message, request.attachments).await;
        if resolved.turn.is_empty() {
            let e = AgentError::InvalidTranscript("user turn has no content".into());
            return Err(self.fail(emitter, &id, e).await);
        }

        let mut history = conversation.history.clone();
        let scope = TurnScope {
            emitter,
            tool_ctx: ToolContext {
                conversation_id: id.to_string(),
                active_entity_id: request.active_entity_id.clone(),
                attachments: Arc::new(resolved.attachments),
            },
            user_turn_index: history.len(),
            reasoning: request.reasoning,
        };
        history.push(resolved.turn);

        info!(conversation_id = %id, "Starting turn");
        let outcome = self.drive(&mut history, &scope).await;

        match outcome {
            LoopOutcome::Finished => {
                conversation.history = history;

                if self.config.generate_titles
                    && conversation.needs_title()
                    && conversation.has_model_text()
                    && !emitter.is_cancelled()
                {
                    if let Some(title) = self.generate_title(&conversation.history).await {
                        conversation.title.clone_from(&title);
                        emitter.emit(AgentEvent::Title { title }).await;
                    }
                }

                if let Err(e) = self.persist(&mut conversation).await {
                    return Err(self.fail(emitter, &id, e).await);
                }

                info!(conversation_id = %id, turns = conversation.history.len(), "Turn completed");
                emitter
                    .emit(AgentEvent::Done {
                        conversation_id: id.to_string(),
                    })
                    .await;
                Ok(TurnOutcome::Completed)
            }
            LoopOutcome::Aborted => {
                history.truncate(consistent_prefix_len(&history));
                conversation.history = history;
                self.persist(&mut conversation).await?;

                info!(conversation_id = %id, "Turn cancelled");
                Ok(TurnOutcome::Cancelled)
            }
            LoopOutcome::Failed(e) => {
                history.truncate(consistent_prefix_len(&history));
                conversation.history = history;
                if let Err(save_err) = self.persist(&mut conversation).await {
                    warn!(conversation_id = %id, error = %save_err, "Failed to save partial history");
                }
                Err(self.fail(emitter, &id, e).await)
            }
        }
    }

    async fn drive(&self, history: &mut Vec<Turn>, scope: &TurnScope<'_>) -> LoopOutcome {
        let mut state = LoopState::BuildRequest;
        let mut iteration = 0;
        let mut pending_images: Vec<BinaryData> = Vec::new();

        loop {
            state = match state {
                LoopState::BuildRequest => {
                    if scope.emitter.is_cancelled() {
                        return LoopOutcome::Aborted;
                    }
                    iteration += 1;
                    if iteration > self.config.max_iterations {
                        return LoopOutcome::Failed(AgentError::MaxIterations(self.config.max_iterations));
                    }
                    debug!(conversation_id = %scope.tool_ctx.conversation_id, iteration, "Model round");
                    LoopState::StreamModel(self.build_request(history, scope).await)
                }

                LoopState::StreamModel(request) => {
                    let round = tokio::time::timeout(
                        self.config.round_timeout,
                        self.stream_round(request, scope.emitter),
                    )
                    .await;

                    match round {
                        Err(_) => {
                            return LoopOutcome::Failed(AgentError::Timeout(self.config.round_timeout.as_secs()));
                        }
                        Ok(Err(e)) => return LoopOutcome::Failed(e),
                        Ok(Ok(None)) => return LoopOutcome::Aborted,
                        Ok(Ok(Some((turn, calls)))) => {
                            if !turn.is_empty() {
                                history.push(turn);
                            }
                            if calls.is_empty() {
                                LoopState::CheckPending
                            } else {
                                LoopState::DispatchTools(calls)
                            }
                        }
                    }
                }

                LoopState::DispatchTools(calls) => {
                    let mut results = Vec::with_capacity(calls.len());

                    for call in calls {
                        if scope.emitter.is_cancelled() {
                            return LoopOutcome::Aborted;
                        }
                        scope
                            .emitter
                            .emit(AgentEvent::ToolCall {
                                name: call.name.clone(),
                                args: call.args_value(),
                            })
                            .await;

                        let mut output = self.tools.dispatch(&call, &scope.tool_ctx).await;
                        if let Some(image) = output.binary.take() {
                            pending_images.push(image);
                        }

                        scope
                            .emitter
                            .emit(AgentEvent::ToolResult {
                                name: call.name.clone(),
                                result: output.response.clone(),
                                deferred: output.deferred,
                            })
                            .await;

                        results.push(Part::ToolResult {
                            name: call.name,
                            response: output.response,
                            continuation_token: call.continuation_token,
                        });
                    }

                    history.push(Turn::tool(results));
                    LoopState::BuildRequest
                }

                LoopState::CheckPending => {
                    if pending_images.is_empty() {
                        return LoopOutcome::Finished;
                    }
                    let mut follow_up = Turn::user(vec![Part::text(IMAGE_FOLLOW_UP)]);
                    follow_up
                        .parts
                        .extend(pending_images.drain(..).map(BinaryData::into_part));
                    history.push(follow_up);
                    LoopState::BuildRequest
                }
            };
        }
    }

    /// Snapshot the history for one round, with fresh context prepended to
    /// the caller's user turn. The snapshot is never written back.
    async fn build_request(&self, history: &[Turn], scope: &TurnScope<'_>) -> ModelRequest {
        let mut contents = history.to_vec();

        let context = self
            .context
            .build_context(scope.tool_ctx.active_entity_id.as_deref())
            .await;
        if let (Some(context), Some(turn)) = (context, contents.get_mut(scope.user_turn_index)) {
            turn.parts
                .insert(0, Part::text(format!("[context]\n{context}\n[/context]")));
        }

        let system_instruction =
            (!self.config.system_prompt.is_empty()).then(|| self.config.system_prompt.clone());

        ModelRequest {
            system_instruction,
            contents,
            tools: self.tools.schemas(),
            options: GenerationOptions {
                reasoning: scope.reasoning,
                ..self.config.generation.clone()
            },
        }
    }

    /// Stream one model round. `None` means the turn was cancelled.
    async fn stream_round(
        &self,
        request: ModelRequest,
        emitter: &EventEmitter,
    ) -> Result<Option<(Turn, Vec<ToolCall>)>> {
        if emitter.is_cancelled() {
            return Ok(None);
        }

        let mut fragments = self.provider.stream(request).await?;
        let mut turn = Turn::new(Role::Model);
        let mut calls = Vec::new();

        while let Some(fragment) = fragments.next().await {
            if emitter.is_cancelled() {
                return Ok(None);
            }

            match fragment? {
                ModelFragment::Thought(content) => {
                    emitter.emit(AgentEvent::Thought { content }).await;
                }
                ModelFragment::Text(content) => {
                    turn.push_text(&content);
                    emitter.emit(AgentEvent::Text { content }).await;
                }
                ModelFragment::ToolCall {
                    name,
                    args,
                    continuation_token,
                } => {
                    turn.push(Part::ToolCall {
                        name: name.clone(),
                        args: args.clone(),
                        continuation_token: continuation_token.clone(),
                    });
                    calls.push(ToolCall::new(name, args, continuation_token));
                }
            }
        }

        Ok(Some((turn, calls)))
    }

    async fn generate_title(&self, history: &[Turn]) -> Option<String> {
        let transcript: String = history
            .iter()
            .take(TITLE_CONTEXT_TURNS)
            .filter(|t| t.role != Role::Tool)
            .map(|t| format!("{}: {}\n", t.role, parse_manifest(&t.text()).0))
            .collect();

        let request = ModelRequest {
            system_instruction: Some(TITLE_PROMPT.into()),
            contents: vec![Turn::user(vec![Part::text(transcript)])],
            tools: Vec::new(),
            options: GenerationOptions {
                reasoning: ReasoningMode::Fast,
                ..self.config.generation.clone()
            },
        };

        match self.provider.complete(request).await {
            Ok(completion) => clean_title(&completion.content),
            Err(e) => {
                debug!(error = %e, "Title generation failed");
                None
            }
        }
    }

    async fn persist(&self, conversation: &mut Conversation) -> Result<()> {
        conversation.touch();
        self.store.save(conversation).await
    }

    /// Report a failure to the caller and hand the error back
    async fn fail(&self, emitter: &EventEmitter, id: &ConversationId, error: AgentError) -> AgentError {
        warn!(conversation_id = %id, error = %error, "Turn failed");
        emitter
            .emit(AgentEvent::Error {
                message: error.user_message(),
            })
            .await;
        emitter
            .emit(AgentEvent::Done {
                conversation_id: id.to_string(),
            })
            .await;
        error
    }
}

fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_matches(|c| c == '"' || c == '\'' || c == '*').trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(TITLE_MAX_CHARS).collect::<String>().trim_end().to_string())
}

/// Builder for the orchestrator
pub struct OrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    store: Option<Arc<dyn ConversationStore>>,
    resolver: Option<Arc<AttachmentResolver>>,
    context: Arc<dyn ContextProvider>,
    config: OrchestratorConfig,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            store: None,
            resolver: None,
            context: Arc::new(NoContext),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tool<T: crate::tool::Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn resolver(mut self, resolver: Arc<AttachmentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn round_timeout(mut self, timeout: Duration) -> Self {
        self.config.round_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TurnOrchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| AgentError::Config("Conversation store is required".into()))?;
        let resolver = self
            .resolver
            .ok_or_else(|| AgentError::Config("Attachment resolver is required".into()))?;

        Ok(TurnOrchestrator {
            provider,
            tools: Arc::new(self.tools),
            store,
            resolver,
            context: self.context,
            config: self.config,
        })
    }
}
