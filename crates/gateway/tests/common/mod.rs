//! Shared fixtures: a scripted LLM provider and an in-memory orchestrator.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use lx_contextpack::ContextAssembler;
use lx_domain::chat::{Chat, ChatId, ChatMessage, ChatRole, MessageId};
use lx_domain::error::{Error, Result};
use lx_domain::stream::{BoxStream, StreamEvent};
use lx_gateway::runtime::{ChatLockMap, TurnEvent, TurnOrchestrator, TurnTuning};
use lx_providers::{ChatRequest, ChatResponse, LlmProvider};
use lx_retrieval::{NoopRetriever, Retriever};
use lx_store::{ConversationStore, JournalStore};

/// How the scripted stream behaves.
#[derive(Clone)]
pub struct Script {
    pub deltas: Vec<String>,
    /// Yield an error after this many deltas instead of finishing.
    pub fail_after: Option<usize>,
    /// Pause before each delta.
    pub delta_gap: Duration,
    /// Reply to the title prompt; `None` makes the call fail.
    pub title: Option<String>,
    pub title_delay: Duration,
    pub classifier: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            deltas: vec!["Hi".into(), " there".into(), "!".into()],
            fail_after: None,
            delta_gap: Duration::ZERO,
            title: Some("问候交流".into()),
            title_delay: Duration::ZERO,
            classifier: "false".into(),
        }
    }
}

pub struct ScriptedProvider {
    script: Mutex<Script>,
    /// Every streamed request, in call order.
    pub stream_requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            stream_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let script = self.script.lock().clone();
        let prompt = req
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let content = if prompt.contains("对话标题") {
            tokio::time::sleep(script.title_delay).await;
            script.title.ok_or_else(|| Error::Provider {
                provider: "scripted".into(),
                message: "title model unavailable".into(),
            })?
        } else {
            script.classifier
        };
        Ok(ChatResponse {
            content,
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.stream_requests.lock().push(req.clone());
        let script = self.script.lock().clone();

        Ok(Box::pin(async_stream::stream! {
            for (i, delta) in script.deltas.into_iter().enumerate() {
                if script.fail_after == Some(i) {
                    yield Err(Error::Provider {
                        provider: "scripted".into(),
                        message: "upstream went away".into(),
                    });
                    return;
                }
                if !script.delta_gap.is_zero() {
                    tokio::time::sleep(script.delta_gap).await;
                }
                yield Ok(StreamEvent::Token { text: delta });
            }
            if script.fail_after.is_some() {
                yield Err(Error::Provider {
                    provider: "scripted".into(),
                    message: "upstream went away".into(),
                });
                return;
            }
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}

pub struct Harness {
    pub store: Arc<JournalStore>,
    pub provider: Arc<ScriptedProvider>,
    pub locks: Arc<ChatLockMap>,
    pub orchestrator: Arc<TurnOrchestrator>,
}

pub fn tuning() -> TurnTuning {
    TurnTuning {
        checkpoint_interval: Duration::ZERO,
        aux_timeout: Duration::from_millis(500),
        ..TurnTuning::default()
    }
}

pub fn harness(script: Script) -> Harness {
    harness_with(script, tuning(), Arc::new(NoopRetriever))
}

pub fn harness_with(
    script: Script,
    tuning: TurnTuning,
    retriever: Arc<dyn Retriever>,
) -> Harness {
    let store = Arc::new(JournalStore::in_memory());
    let provider = Arc::new(ScriptedProvider::new(script));
    let locks = Arc::new(ChatLockMap::new());
    let orchestrator = Arc::new(TurnOrchestrator::new(
        store.clone() as Arc<dyn ConversationStore>,
        provider.clone() as Arc<dyn LlmProvider>,
        retriever,
        ContextAssembler::default(),
        tuning,
        locks.clone(),
    ));
    Harness {
        store,
        provider,
        locks,
        orchestrator,
    }
}

/// Journal store that can be told to fail specific writes.
pub struct FailingStore {
    pub inner: JournalStore,
    /// Fail every `create_message` for a user message.
    pub fail_user_messages: bool,
    /// Let this many `update_message_content` calls through, fail the rest.
    pub content_writes_allowed: Option<usize>,
    pub content_writes: AtomicUsize,
    pub mark_complete_calls: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self {
            inner: JournalStore::in_memory(),
            fail_user_messages: false,
            content_writes_allowed: None,
            content_writes: AtomicUsize::new(0),
            mark_complete_calls: AtomicUsize::new(0),
        }
    }
}

fn disk_full() -> Error {
    Error::Storage("disk full".into())
}

#[async_trait::async_trait]
impl ConversationStore for FailingStore {
    async fn create_chat(&self, user_id: &str, title: Option<&str>) -> Result<Chat> {
        self.inner.create_chat(user_id, title).await
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        self.inner.get_chat(chat_id).await
    }

    async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        self.inner.list_chats(user_id).await
    }

    async fn update_chat_title(&self, chat_id: ChatId, title: &str) -> Result<()> {
        self.inner.update_chat_title(chat_id, title).await
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<()> {
        self.inner.delete_chat(chat_id).await
    }

    async fn create_message(
        &self,
        chat_id: ChatId,
        role: ChatRole,
        content: &str,
        is_complete: bool,
    ) -> Result<ChatMessage> {
        if self.fail_user_messages && role == ChatRole::User {
            return Err(disk_full());
        }
        self.inner
            .create_message(chat_id, role, content, is_complete)
            .await
    }

    async fn append_to_message(&self, message_id: MessageId, delta: &str) -> Result<()> {
        self.inner.append_to_message(message_id, delta).await
    }

    async fn update_message_content(&self, message_id: MessageId, content: &str) -> Result<()> {
        let n = self.content_writes.fetch_add(1, Ordering::SeqCst);
        if self.content_writes_allowed.is_some_and(|allowed| n >= allowed) {
            return Err(disk_full());
        }
        self.inner.update_message_content(message_id, content).await
    }

    async fn mark_complete(&self, message_id: MessageId) -> Result<()> {
        self.mark_complete_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_complete(message_id).await
    }

    async fn get_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>> {
        self.inner.get_message(message_id).await
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>> {
        self.inner.list_messages(chat_id).await
    }

    async fn incomplete_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>> {
        self.inner.incomplete_messages(chat_id).await
    }
}

/// An orchestrator writing through `store` with the default script.
pub fn failing_harness(
    store: FailingStore,
) -> (Arc<FailingStore>, Arc<ScriptedProvider>, Arc<TurnOrchestrator>) {
    let store = Arc::new(store);
    let provider = Arc::new(ScriptedProvider::new(Script::default()));
    let orchestrator = Arc::new(TurnOrchestrator::new(
        store.clone() as Arc<dyn ConversationStore>,
        provider.clone() as Arc<dyn LlmProvider>,
        Arc::new(NoopRetriever),
        ContextAssembler::default(),
        tuning(),
        Arc::new(ChatLockMap::new()),
    ));
    (store, provider, orchestrator)
}

/// Drain a turn's events until the channel closes.
pub async fn collect(mut rx: tokio::sync::mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn tokens(events: &[TurnEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Token { content } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

/// Wait until no turn holds `chat_id`, i.e. every write has landed.
pub async fn settle(locks: &ChatLockMap, chat_id: i64) {
    for _ in 0..200 {
        if !locks.is_busy(chat_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("turn on chat {chat_id} did not finish");
}
