//! Append-only JSONL journal backing the conversation store.
//!
//! All chats and messages live in `<state_dir>/conversations.jsonl`. Each
//! mutation is one [`JournalOp`] line. The file is written before the
//! in-memory indexes change, so a failed write leaves the store exactly as
//! it was and surfaces `Error::Storage`.

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::RwLock;

use lx_domain::chat::{Chat, ChatId, ChatMessage, ChatRole, MessageId, DEFAULT_CHAT_TITLE};
use lx_domain::config::StoreConfig;
use lx_domain::error::{Error, Result};
use lx_domain::trace::TraceEvent;

use crate::state::{ConversationState, JournalOp};
use crate::store::ConversationStore;

pub const JOURNAL_FILE: &str = "conversations.jsonl";

/// Conversation store with in-memory indexes and a JSONL write-ahead
/// journal.
pub struct JournalStore {
    /// `None` keeps everything in memory (tests).
    path: Option<PathBuf>,
    state: RwLock<ConversationState>,
    /// Serializes validate -> write -> apply so two writers never validate
    /// against the same snapshot.
    write_gate: tokio::sync::Mutex<()>,
}

impl JournalStore {
    /// A store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(ConversationState::new()),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Open (or create) the journal under `config.state_dir`, replay it,
    /// optionally compact it, then close out any message a crash left
    /// incomplete.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let dir = config.state_dir.clone();
        let path = dir.join(JOURNAL_FILE);

        let replay_path = path.clone();
        let (state, skipped_lines) = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::Storage(format!("creating {}: {e}", dir.display())))?;
            replay_file(&replay_path)
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        let store = Self {
            path: Some(path),
            state: RwLock::new(state),
            write_gate: tokio::sync::Mutex::new(()),
        };

        if config.compact_on_start {
            store.compact().await?;
        }

        let recovered_incomplete = store.recover_incomplete().await?;

        let (chats, messages) = {
            let state = store.state.read();
            (state.chat_count(), state.message_count())
        };
        TraceEvent::StoreReplayed {
            chats,
            messages,
            skipped_lines,
            recovered_incomplete,
        }
        .emit();

        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rewrite the journal as the minimal set of ops that rebuilds the
    /// current state. Returns the number of lines written.
    pub async fn compact(&self) -> Result<usize> {
        let Some(path) = self.path.clone() else {
            return Ok(0);
        };
        let _gate = self.write_gate.lock().await;

        let ops = self.state.read().snapshot();
        let buf = serialize_ops(&ops)?;
        let lines = ops.len();

        tokio::task::spawn_blocking(move || {
            let tmp = path.with_extension("jsonl.tmp");
            std::fs::write(&tmp, buf.as_bytes())
                .map_err(|e| Error::Storage(format!("writing {}: {e}", tmp.display())))?;
            std::fs::rename(&tmp, &path)
                .map_err(|e| Error::Storage(format!("replacing {}: {e}", path.display())))
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        tracing::info!(lines, "conversation journal compacted");
        Ok(lines)
    }

    /// Mark every incomplete message complete. Only a crash mid-turn can
    /// leave one behind, and nothing will ever finish it after restart.
    async fn recover_incomplete(&self) -> Result<usize> {
        let pending = self.state.read().all_incomplete();
        for message_id in &pending {
            tracing::warn!(message_id, "completing message interrupted by shutdown");
            self.mark_complete(*message_id).await?;
        }
        Ok(pending.len())
    }

    /// Build an op against the current state, validate it, persist it,
    /// then apply it. `build` may return `None` when nothing needs to be
    /// written.
    async fn commit<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(&ConversationState) -> Result<(Option<JournalOp>, T)> + Send,
        T: Send,
    {
        let _gate = self.write_gate.lock().await;

        let (op, out) = {
            let state = self.state.read();
            let (op, out) = build(&state)?;
            if let Some(op) = &op {
                state.validate(op)?;
            }
            (op, out)
        };

        if let Some(op) = op {
            if let Some(path) = &self.path {
                append_line(path.clone(), serialize_ops(std::slice::from_ref(&op))?).await?;
            }
            self.state.write().apply(op);
        }
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ConversationStore for JournalStore {
    async fn create_chat(&self, user_id: &str, title: Option<&str>) -> Result<Chat> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_CHAT_TITLE)
            .to_owned();
        let user_id = user_id.to_owned();

        self.commit(move |state| {
            let now = Utc::now();
            let chat = Chat {
                id: state.allocate_chat_id(),
                user_id,
                title,
                created_at: now,
                updated_at: now,
            };
            Ok((Some(JournalOp::ChatCreated { chat: chat.clone() }), chat))
        })
        .await
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>> {
        Ok(self.state.read().chat(chat_id).cloned())
    }

    async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>> {
        Ok(self.state.read().chats_for_user(user_id))
    }

    async fn update_chat_title(&self, chat_id: ChatId, title: &str) -> Result<()> {
        let title = title.to_owned();
        self.commit(move |_| {
            let op = JournalOp::ChatTitle {
                chat_id,
                title,
                at: Utc::now(),
            };
            Ok((Some(op), ()))
        })
        .await
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<()> {
        self.commit(move |_| Ok((Some(JournalOp::ChatDeleted { chat_id }), ())))
            .await
    }

    async fn create_message(
        &self,
        chat_id: ChatId,
        role: ChatRole,
        content: &str,
        is_complete: bool,
    ) -> Result<ChatMessage> {
        let content = content.to_owned();
        self.commit(move |state| {
            let now = Utc::now();
            let message = ChatMessage {
                id: state.allocate_message_id(),
                chat_id,
                role,
                content,
                is_complete,
                created_at: now,
                updated_at: now,
            };
            Ok((
                Some(JournalOp::MessageCreated {
                    message: message.clone(),
                }),
                message,
            ))
        })
        .await
    }

    async fn append_to_message(&self, message_id: MessageId, delta: &str) -> Result<()> {
        let delta = delta.to_owned();
        self.commit(move |state| {
            let current = state
                .message(message_id)
                .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
            if delta.is_empty() && !current.is_complete {
                return Ok((None, ()));
            }
            let op = JournalOp::MessageAppended {
                message_id,
                delta,
                at: Utc::now(),
            };
            Ok((Some(op), ()))
        })
        .await
    }

    async fn update_message_content(&self, message_id: MessageId, content: &str) -> Result<()> {
        let content = content.to_owned();
        self.commit(move |state| {
            let current = state
                .message(message_id)
                .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
            if current.is_complete {
                return Err(Error::Conflict(format!(
                    "message {message_id} is complete and cannot change"
                )));
            }
            let Some(suffix) = content.strip_prefix(current.content.as_str()) else {
                return Err(Error::Conflict(format!(
                    "content of message {message_id} may only grow"
                )));
            };
            if suffix.is_empty() {
                return Ok((None, ()));
            }
            let op = JournalOp::MessageAppended {
                message_id,
                delta: suffix.to_owned(),
                at: Utc::now(),
            };
            Ok((Some(op), ()))
        })
        .await
    }

    async fn mark_complete(&self, message_id: MessageId) -> Result<()> {
        self.commit(move |state| {
            let current = state
                .message(message_id)
                .ok_or_else(|| Error::NotFound(format!("message {message_id}")))?;
            if current.is_complete {
                return Ok((None, ()));
            }
            let op = JournalOp::MessageCompleted {
                message_id,
                at: Utc::now(),
            };
            Ok((Some(op), ()))
        })
        .await
    }

    async fn get_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>> {
        Ok(self.state.read().message(message_id).cloned())
    }

    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>> {
        Ok(self.state.read().messages_for_chat(chat_id))
    }

    async fn incomplete_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>> {
        Ok(self.state.read().incomplete_in_chat(chat_id))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn serialize_ops(ops: &[JournalOp]) -> Result<String> {
    let mut buf = String::new();
    for op in ops {
        let json = serde_json::to_string(op)
            .map_err(|e| Error::Storage(format!("serializing journal op: {e}")))?;
        buf.push_str(&json);
        buf.push('\n');
    }
    Ok(buf)
}

async fn append_line(path: PathBuf, buf: String) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("opening {}: {e}", path.display())))?;
        file.write_all(buf.as_bytes())
            .map_err(|e| Error::Storage(format!("appending to {}: {e}", path.display())))?;
        Ok::<(), Error>(())
    })
    .await
    .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))?
}

/// Rebuild state from a journal file. Returns the state and the number of
/// lines that were skipped.
fn replay_file(path: &Path) -> Result<(ConversationState, usize)> {
    let mut state = ConversationState::new();
    if !path.exists() {
        return Ok((state, 0));
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Storage(format!("reading {}: {e}", path.display())))?;
    let mut skipped = 0;
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let op = match serde_json::from_str::<JournalOp>(line) {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "skipping malformed journal line");
                skipped += 1;
                continue;
            }
        };
        if let Err(e) = state.validate(&op) {
            tracing::warn!(line = idx + 1, error = %e, "skipping inconsistent journal line");
            skipped += 1;
            continue;
        }
        state.apply(op);
    }
    Ok((state, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_list_chats_newest_first() {
        let store = JournalStore::in_memory();
        let a = store.create_chat("u1", None).await.unwrap();
        let b = store.create_chat("u1", Some("合同纠纷")).await.unwrap();
        store.create_chat("u2", None).await.unwrap();

        assert_eq!(a.title, DEFAULT_CHAT_TITLE);
        assert_eq!(b.title, "合同纠纷");

        store
            .create_message(a.id, ChatRole::User, "hello", true)
            .await
            .unwrap();

        let chats = store.list_chats("u1").await.unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, a.id);
    }

    #[tokio::test]
    async fn append_and_complete() {
        let store = JournalStore::in_memory();
        let chat = store.create_chat("u1", None).await.unwrap();
        let msg = store
            .create_message(chat.id, ChatRole::Assistant, "", false)
            .await
            .unwrap();

        store.append_to_message(msg.id, "Hi").await.unwrap();
        store.append_to_message(msg.id, " there").await.unwrap();
        store.update_message_content(msg.id, "Hi there!").await.unwrap();
        store.mark_complete(msg.id).await.unwrap();
        store.mark_complete(msg.id).await.unwrap();

        let stored = store.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "Hi there!");
        assert!(stored.is_complete);

        let err = store.append_to_message(msg.id, "late").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn content_updates_must_extend_stored_text() {
        let store = JournalStore::in_memory();
        let chat = store.create_chat("u1", None).await.unwrap();
        let msg = store
            .create_message(chat.id, ChatRole::Assistant, "", false)
            .await
            .unwrap();

        store.update_message_content(msg.id, "Hi").await.unwrap();
        let err = store.update_message_content(msg.id, "Ho").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        store.update_message_content(msg.id, "Hi").await.unwrap();

        let stored = store.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "Hi");
    }

    #[tokio::test]
    async fn checkpoints_journal_only_new_text() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            state_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = JournalStore::open(&config).await.unwrap();
        let chat = store.create_chat("u1", None).await.unwrap();
        let msg = store
            .create_message(chat.id, ChatRole::Assistant, "", false)
            .await
            .unwrap();

        let mut reply = String::new();
        for i in 0..50 {
            reply.push_str(&format!("段落{i:02}。"));
            store.update_message_content(msg.id, &reply).await.unwrap();
        }

        let raw = std::fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap();
        let appended: Vec<JournalOp> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .filter(|op| matches!(op, JournalOp::MessageAppended { .. }))
            .collect();
        assert_eq!(appended.len(), 50);
        for op in &appended {
            if let JournalOp::MessageAppended { delta, .. } = op {
                assert_eq!(delta.chars().count(), 5);
            }
        }
        drop(store);
        let reopened = JournalStore::open(&config).await.unwrap();
        let stored = reopened.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.content, reply);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = JournalStore::in_memory();
        assert!(store.get_chat(42).await.unwrap().is_none());
        assert!(matches!(
            store.update_chat_title(42, "x").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.mark_complete(7).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.create_message(42, ChatRole::User, "hi", true).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_validation_leaves_state_untouched() {
        let store = JournalStore::in_memory();
        let chat = store.create_chat("u1", None).await.unwrap();
        store
            .create_message(chat.id, ChatRole::Assistant, "", false)
            .await
            .unwrap();
        let err = store
            .create_message(chat.id, ChatRole::Assistant, "", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.list_messages(chat.id).await.unwrap().len(), 1);
        assert_eq!(store.incomplete_messages(chat.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn write_failure_surfaces_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            state_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = JournalStore::open(&config).await.unwrap();
        let chat = store.create_chat("u1", None).await.unwrap();

        // Replace the journal with a directory so the next append fails.
        let path = dir.path().join(JOURNAL_FILE);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = store
            .create_message(chat.id, ChatRole::User, "hello", true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.list_messages(chat.id).await.unwrap().is_empty());
    }
}
