//! Turn execution: persist the user message, assemble context, stream the
//! answer into a placeholder message and run the title and file-need
//! analyses alongside.
//!
//! Entry point: [`TurnOrchestrator::start`] validates the request, takes
//! the chat's turn lock, spawns the turn and returns a channel of
//! [`TurnEvent`]s.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use lx_contextpack::{ContextAssembler, DEFAULT_SYSTEM_PROMPT};
use lx_domain::chat::{Chat, ChatId, ChatRole, MessageId};
use lx_domain::config::{Config, ModelSettings};
use lx_domain::error::Error;
use lx_domain::message::HistoryEntry;
use lx_domain::stream::BoxStream;
use lx_domain::trace::TraceEvent;
use lx_providers::{text_deltas, ChatRequest, LlmProvider};
use lx_retrieval::Retriever;
use lx_store::ConversationStore;

use super::chat_lock::ChatLockMap;
use super::{file_need, title};

type AuxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during a single turn.
///
/// Tokens arrive in generation order. `Title` and `NeedFile` arrive at
/// most once each, interleaved anywhere before `Done`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// The user message was stored.
    #[serde(rename = "message")]
    UserMessage {
        content: String,
        timestamp: DateTime<Utc>,
    },
    Token { content: String },
    /// The chat was renamed.
    Title { content: String },
    NeedFile { content: bool },
    Error { content: String },
    /// The turn finalized; carries the completion time.
    Done { content: DateTime<Utc> },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Created,
    UserMessagePersisted,
    ContextAssembled,
    Streaming,
    Finalizing,
    Done,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    UpstreamError,
    Disconnected,
    StorageError,
    InputError,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::UpstreamError => "upstream_error",
            Outcome::Disconnected => "disconnected",
            Outcome::StorageError => "storage_error",
            Outcome::InputError => "input_error",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub chat_id: ChatId,
    /// Authenticated caller; must own the chat.
    pub user_id: String,
    pub content: String,
}

/// A running turn. Dropping `events` is treated as a client disconnect.
#[derive(Debug)]
pub struct TurnHandle {
    pub turn_id: Uuid,
    pub events: mpsc::Receiver<TurnEvent>,
}

/// Why a turn was not started.
#[derive(Debug, thiserror::Error)]
pub enum TurnRejected {
    #[error("message content is empty")]
    EmptyContent,
    /// Unknown chat, or one owned by someone else.
    #[error("chat {0} not found")]
    ChatNotFound(ChatId),
    #[error("{0}")]
    Internal(Error),
}

/// Orchestrator knobs resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct TurnTuning {
    pub system_prompt: String,
    pub top_k: u32,
    /// Minimum gap between checkpoint writes; zero writes every delta.
    pub checkpoint_interval: Duration,
    pub title_max_chars: usize,
    pub apology: String,
    pub aux_timeout: Duration,
    pub first_delta_timeout: Duration,
    pub idle_timeout: Duration,
    pub event_buffer: usize,
    pub chat_model: ModelSettings,
    pub title_model: ModelSettings,
    pub classifier_model: ModelSettings,
}

impl TurnTuning {
    pub fn from_config(config: &Config) -> Self {
        let chat = &config.chat;
        Self {
            system_prompt: chat
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_owned()),
            top_k: config.retrieval.top_k,
            checkpoint_interval: Duration::from_millis(chat.checkpoint_interval_ms),
            title_max_chars: chat.title_max_chars,
            apology: chat.apology.clone(),
            aux_timeout: Duration::from_millis(chat.aux_timeout_ms),
            first_delta_timeout: Duration::from_millis(config.llm.first_delta_timeout_ms),
            idle_timeout: Duration::from_millis(config.llm.idle_timeout_ms),
            event_buffer: chat.event_buffer.max(1),
            chat_model: config.llm.chat.clone(),
            title_model: config.llm.title.clone(),
            classifier_model: config.llm.classifier.clone(),
        }
    }
}

impl Default for TurnTuning {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnOrchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs turns. Built once at startup and shared as `Arc<TurnOrchestrator>`.
pub struct TurnOrchestrator {
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn LlmProvider>,
    retriever: Arc<dyn Retriever>,
    assembler: ContextAssembler,
    tuning: TurnTuning,
    locks: Arc<ChatLockMap>,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn LlmProvider>,
        retriever: Arc<dyn Retriever>,
        assembler: ContextAssembler,
        tuning: TurnTuning,
        locks: Arc<ChatLockMap>,
    ) -> Self {
        Self {
            store,
            provider,
            retriever,
            assembler,
            tuning,
            locks,
        }
    }

    pub fn tuning(&self) -> &TurnTuning {
        &self.tuning
    }

    /// Validate the request and start a turn.
    ///
    /// Waits for any in-flight turn on the same chat to finish first. The
    /// lock is held by the spawned task until the turn has finalized.
    pub async fn start(self: &Arc<Self>, input: TurnInput) -> Result<TurnHandle, TurnRejected> {
        if input.content.trim().is_empty() {
            return Err(TurnRejected::EmptyContent);
        }

        match self.store.get_chat(input.chat_id).await {
            Ok(Some(chat)) if chat.user_id == input.user_id => {}
            Ok(_) => return Err(TurnRejected::ChatNotFound(input.chat_id)),
            Err(e) => return Err(TurnRejected::Internal(e)),
        }

        let permit = self
            .locks
            .acquire(input.chat_id)
            .await
            .map_err(TurnRejected::Internal)?;

        let (tx, rx) = mpsc::channel::<TurnEvent>(self.tuning.event_buffer);
        let turn_id = Uuid::new_v4();

        let turn_span = tracing::info_span!(
            "turn",
            %turn_id,
            chat_id = input.chat_id,
            user_id = %input.user_id,
            "otel.kind" = "SERVER",
        );
        let this = Arc::clone(self);
        tokio::spawn(
            async move {
                tracing::debug!("turn started");
                let started = Instant::now();
                let mut run = TurnRun {
                    orch: &this,
                    input,
                    tx,
                    phase: TurnPhase::Created,
                    deltas: 0,
                    buffer: String::new(),
                };
                let outcome = run.execute().await;

                TraceEvent::TurnFinished {
                    turn_id: turn_id.to_string(),
                    chat_id: run.input.chat_id,
                    outcome: outcome.as_str().to_owned(),
                    deltas: run.deltas,
                    chars: run.buffer.chars().count(),
                    duration_ms: started.elapsed().as_millis() as u64,
                }
                .emit();

                // Release the chat only after every write of this turn.
                drop(permit);
            }
            .instrument(turn_span),
        );

        Ok(TurnHandle {
            turn_id,
            events: rx,
        })
    }

    // ── auxiliary analyses ───────────────────────────────────────────

    /// Regenerate the chat title and persist it when it changed. Resolves
    /// to the new title, or `None` when nothing changed or anything failed.
    fn title_task(&self, chat: &Chat, latest_message: &str) -> AuxFuture<Option<String>> {
        let provider = self.provider.clone();
        let store = self.store.clone();
        let settings = self.tuning.title_model.clone();
        let max_chars = self.tuning.title_max_chars;
        let limit = self.tuning.aux_timeout;
        let chat_id = chat.id;
        let current = chat.title.clone();
        let latest = latest_message.to_owned();

        Box::pin(
            async move {
                let generated = tokio::time::timeout(
                    limit,
                    title::generate_title(provider.as_ref(), &settings, &current, &latest, max_chars),
                )
                .await;
                let candidate = match generated {
                    Ok(Ok(candidate)) => candidate,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "title generation failed, keeping title");
                        return None;
                    }
                    Err(_) => {
                        tracing::warn!(timeout_ms = limit.as_millis() as u64, "title generation timed out");
                        return None;
                    }
                };
                if candidate == current {
                    return None;
                }
                if let Err(e) = store.update_chat_title(chat_id, &candidate).await {
                    tracing::warn!(error = %e, "failed to persist new title");
                    return None;
                }
                TraceEvent::TitleUpdated {
                    chat_id,
                    old_title: current,
                    new_title: candidate.clone(),
                }
                .emit();
                Some(candidate)
            }
            .in_current_span(),
        )
    }

    /// Classify whether the question needs an uploaded file; `false` on
    /// failure or timeout.
    fn need_file_task(&self, question: &str) -> AuxFuture<bool> {
        let provider = self.provider.clone();
        let settings = self.tuning.classifier_model.clone();
        let limit = self.tuning.aux_timeout;
        let question = question.to_owned();

        Box::pin(
            async move {
                match tokio::time::timeout(
                    limit,
                    file_need::needs_file(provider.as_ref(), &settings, &question),
                )
                .await
                {
                    Ok(Ok(need)) => need,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "file-need classification failed");
                        false
                    }
                    Err(_) => {
                        tracing::warn!("file-need classification timed out");
                        false
                    }
                }
            }
            .in_current_span(),
        )
    }

    /// Upstream deltas. Opening the stream happens lazily inside so the
    /// first-delta timeout covers the request as well.
    fn delta_stream(&self, req: ChatRequest) -> BoxStream<'static, lx_domain::error::Result<String>> {
        let provider = self.provider.clone();
        Box::pin(async_stream::stream! {
            match provider.chat_stream(&req).await {
                Ok(events) => {
                    let mut deltas = text_deltas(provider.provider_id(), events);
                    while let Some(item) = deltas.next().await {
                        yield item;
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnRun
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TurnRun<'a> {
    orch: &'a TurnOrchestrator,
    input: TurnInput,
    tx: mpsc::Sender<TurnEvent>,
    phase: TurnPhase,
    deltas: usize,
    buffer: String,
}

impl TurnRun<'_> {
    fn transition(&mut self, next: TurnPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "turn phase");
        self.phase = next;
    }

    /// Returns false once the receiver is gone.
    async fn emit(&self, event: TurnEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    async fn execute(&mut self) -> Outcome {
        let store = self.orch.store.clone();
        let chat_id = self.input.chat_id;

        // ── Created → UserMessagePersisted ───────────────────────────
        let user_message = match store
            .create_message(chat_id, ChatRole::User, &self.input.content, true)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "failed to persist user message");
                self.transition(TurnPhase::Errored);
                self.emit(TurnEvent::Error {
                    content: "failed to save message".into(),
                })
                .await;
                return Outcome::InputError;
            }
        };
        self.transition(TurnPhase::UserMessagePersisted);

        if !self
            .emit(TurnEvent::UserMessage {
                content: user_message.content.clone(),
                timestamp: user_message.created_at,
            })
            .await
        {
            return Outcome::Disconnected;
        }

        // ── UserMessagePersisted → ContextAssembled ──────────────────
        let (chat, history) = match self.load_context(user_message.id).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(error = %e, "failed to load chat history");
                self.transition(TurnPhase::Errored);
                self.emit(TurnEvent::Error {
                    content: "failed to load conversation".into(),
                })
                .await;
                return Outcome::StorageError;
            }
        };

        let snippets: Vec<String> = self
            .orch
            .retriever
            .search(&self.input.content, &self.input.user_id, self.orch.tuning.top_k)
            .await
            .into_iter()
            .map(|s| s.content)
            .collect();

        let (messages, report) = self.orch.assembler.assemble(
            &self.orch.tuning.system_prompt,
            &history,
            &self.input.content,
            &snippets,
        );
        TraceEvent::ContextAssembled {
            chat_id,
            history_messages: report.history_messages,
            history_dropped: report.history_dropped,
            snippets_included: report.snippets_included,
            snippets_truncated: report.snippets_truncated,
            reference_chars: report.reference_chars,
        }
        .emit();
        self.transition(TurnPhase::ContextAssembled);

        // ── ContextAssembled → Streaming ─────────────────────────────
        let placeholder = match store
            .create_message(chat_id, ChatRole::Assistant, "", false)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "failed to create assistant placeholder");
                self.transition(TurnPhase::Errored);
                self.emit(TurnEvent::Error {
                    content: "failed to save reply".into(),
                })
                .await;
                return Outcome::StorageError;
            }
        };
        self.transition(TurnPhase::Streaming);

        let mut title_task = Some(self.orch.title_task(&chat, &self.input.content));
        let mut need_file_task = Some(self.orch.need_file_task(&self.input.content));

        let settings = &self.orch.tuning.chat_model;
        let mut deltas = self.orch.delta_stream(ChatRequest {
            messages,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            model: settings.model.clone(),
        });

        let checkpoint_interval = self.orch.tuning.checkpoint_interval;
        let idle_timeout = self.orch.tuning.idle_timeout;
        let mut persisted_len = 0usize;
        let mut last_checkpoint = Instant::now();
        let mut upstream_error: Option<Error> = None;
        let mut disconnected = false;

        let stall = tokio::time::sleep(self.orch.tuning.first_delta_timeout);
        tokio::pin!(stall);

        loop {
            tokio::select! {
                item = deltas.next() => match item {
                    Some(Ok(delta)) => {
                        self.deltas += 1;
                        self.buffer.push_str(&delta);
                        stall.as_mut().reset(tokio::time::Instant::now() + idle_timeout);

                        if !self.emit(TurnEvent::Token { content: delta }).await {
                            disconnected = true;
                            break;
                        }

                        if checkpoint_interval.is_zero() || last_checkpoint.elapsed() >= checkpoint_interval {
                            if let Err(e) = store.update_message_content(placeholder.id, &self.buffer).await {
                                return self.abort_on_storage(placeholder.id, e).await;
                            }
                            persisted_len = self.buffer.len();
                            last_checkpoint = Instant::now();
                        }
                    }
                    Some(Err(e)) => {
                        upstream_error = Some(e);
                        break;
                    }
                    None => break,
                },
                () = &mut stall => {
                    let what = if self.deltas == 0 { "no response from model" } else { "model stream stalled" };
                    upstream_error = Some(Error::Timeout(what.into()));
                    break;
                }
                new_title = next_aux(&mut title_task), if title_task.is_some() => {
                    title_task = None;
                    if let Some(content) = new_title {
                        if !self.emit(TurnEvent::Title { content }).await {
                            disconnected = true;
                            break;
                        }
                    }
                }
                need = next_aux(&mut need_file_task), if need_file_task.is_some() => {
                    need_file_task = None;
                    if !self.emit(TurnEvent::NeedFile { content: need }).await {
                        disconnected = true;
                        break;
                    }
                }
                () = self.tx.closed() => {
                    disconnected = true;
                    break;
                }
            }
        }
        drop(deltas);

        // ── Streaming → Finalizing ───────────────────────────────────
        self.transition(TurnPhase::Finalizing);

        if let Some(e) = &upstream_error {
            tracing::warn!(error = %e, deltas = self.deltas, "upstream stream failed");
            if !disconnected {
                let apology = self.orch.tuning.apology.clone();
                disconnected = !self.emit(TurnEvent::Token { content: apology }).await
                    || !self
                        .emit(TurnEvent::Error {
                            content: "model request failed".into(),
                        })
                        .await;
            }
        }
        if disconnected {
            tracing::info!(chars = self.buffer.len(), "client went away, keeping partial reply");
        }

        if self.buffer.len() != persisted_len {
            if let Err(e) = store.update_message_content(placeholder.id, &self.buffer).await {
                return self.abort_on_storage(placeholder.id, e).await;
            }
        }
        if let Err(e) = store.mark_complete(placeholder.id).await {
            return self.abort_on_storage(placeholder.id, e).await;
        }

        // ── Finalizing → Done ────────────────────────────────────────
        if !disconnected {
            if let Some(task) = title_task.take() {
                if let Some(content) = task.await {
                    disconnected = !self.emit(TurnEvent::Title { content }).await;
                }
            }
        }
        if !disconnected {
            if let Some(task) = need_file_task.take() {
                let need = task.await;
                disconnected = !self.emit(TurnEvent::NeedFile { content: need }).await;
            }
        }
        if !disconnected {
            self.emit(TurnEvent::Done {
                content: Utc::now(),
            })
            .await;
        }
        self.transition(TurnPhase::Done);

        match (upstream_error, disconnected) {
            (Some(_), _) => Outcome::UpstreamError,
            (None, true) => Outcome::Disconnected,
            (None, false) => Outcome::Completed,
        }
    }

    /// Current chat (the title may have changed since `start`) and the
    /// completed history before `current_message`.
    async fn load_context(
        &self,
        current_message: MessageId,
    ) -> lx_domain::error::Result<(Chat, Vec<HistoryEntry>)> {
        let chat_id = self.input.chat_id;
        let chat = self
            .orch
            .store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chat {chat_id}")))?;
        let history = self
            .orch
            .store
            .list_messages(chat_id)
            .await?
            .iter()
            .filter(|m| m.id != current_message && m.is_complete)
            .map(HistoryEntry::from)
            .collect();
        Ok((chat, history))
    }

    /// A durable write failed after the placeholder exists: report it, try
    /// once to close the placeholder, end the turn without `done`.
    async fn abort_on_storage(&mut self, message_id: MessageId, error: Error) -> Outcome {
        tracing::error!(error = %error, message_id, "storage failure during turn");
        self.transition(TurnPhase::Errored);
        self.emit(TurnEvent::Error {
            content: "failed to save reply".into(),
        })
        .await;
        if let Err(e) = self.orch.store.mark_complete(message_id).await {
            tracing::error!(error = %e, message_id, "could not finalize assistant message");
        }
        Outcome::StorageError
    }
}

/// Await a pending auxiliary future; never resolves when there is none.
async fn next_aux<T>(task: &mut Option<AuxFuture<T>>) -> T {
    match task.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let token = serde_json::to_value(TurnEvent::Token {
            content: "Hi".into(),
        })
        .unwrap();
        assert_eq!(token, serde_json::json!({"type": "token", "content": "Hi"}));

        let need = serde_json::to_value(TurnEvent::NeedFile { content: true }).unwrap();
        assert_eq!(need["type"], "need_file");
        assert_eq!(need["content"], true);

        let echo = serde_json::to_value(TurnEvent::UserMessage {
            content: "Hello".into(),
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(echo["type"], "message");
        assert!(echo["timestamp"].is_string());
    }

    #[test]
    fn tuning_defaults_follow_config() {
        let tuning = TurnTuning::default();
        assert_eq!(tuning.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(tuning.title_max_chars, 15);
        assert_eq!(tuning.top_k, 3);
        assert_eq!(tuning.checkpoint_interval, Duration::from_millis(250));
        assert_eq!(tuning.idle_timeout, Duration::from_secs(30));
    }
}
