//! In-memory conversation indexes and the journal operations that mutate
//! them.
//!
//! Every mutation is expressed as a [`JournalOp`]. [`ConversationState::
//! validate`] checks the op against the store invariants and
//! [`ConversationState::apply`] performs it. The journal store validates,
//! writes the op to disk, then applies it, so the in-memory view never
//! runs ahead of the file.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lx_domain::chat::{Chat, ChatId, ChatMessage, ChatRole, MessageId};
use lx_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Journal operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One line of the conversation journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalOp {
    /// Id allocation floor, written at the head of compacted journals so
    /// ids of deleted rows are never handed out again.
    Counters {
        next_chat_id: ChatId,
        next_message_id: MessageId,
    },
    ChatCreated {
        chat: Chat,
    },
    ChatTitle {
        chat_id: ChatId,
        title: String,
        at: DateTime<Utc>,
    },
    ChatDeleted {
        chat_id: ChatId,
    },
    MessageCreated {
        message: ChatMessage,
    },
    /// Text added to the end of an incomplete message. Checkpoints only
    /// write the suffix past what is already stored, so a long reply grows
    /// the journal linearly.
    MessageAppended {
        message_id: MessageId,
        delta: String,
        at: DateTime<Utc>,
    },
    MessageCompleted {
        message_id: MessageId,
        at: DateTime<Utc>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct ConversationState {
    chats: BTreeMap<ChatId, Chat>,
    messages: BTreeMap<MessageId, ChatMessage>,
    /// Message ids per chat in insertion order.
    by_chat: HashMap<ChatId, Vec<MessageId>>,
    next_chat_id: ChatId,
    next_message_id: MessageId,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            next_chat_id: 1,
            next_message_id: 1,
            ..Default::default()
        }
    }

    pub fn allocate_chat_id(&self) -> ChatId {
        self.next_chat_id
    }

    pub fn allocate_message_id(&self) -> MessageId {
        self.next_message_id
    }

    // ── reads ────────────────────────────────────────────────────────

    pub fn chat(&self, chat_id: ChatId) -> Option<&Chat> {
        self.chats.get(&chat_id)
    }

    pub fn message(&self, message_id: MessageId) -> Option<&ChatMessage> {
        self.messages.get(&message_id)
    }

    pub fn chats_for_user(&self, user_id: &str) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self
            .chats
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        chats
    }

    pub fn messages_for_chat(&self, chat_id: ChatId) -> Vec<ChatMessage> {
        self.by_chat
            .get(&chat_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn incomplete_in_chat(&self, chat_id: ChatId) -> Vec<ChatMessage> {
        self.messages_for_chat(chat_id)
            .into_iter()
            .filter(|m| !m.is_complete)
            .collect()
    }

    pub fn all_incomplete(&self) -> Vec<MessageId> {
        self.messages
            .values()
            .filter(|m| !m.is_complete)
            .map(|m| m.id)
            .collect()
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Ops that rebuild this state from scratch (used for compaction).
    pub fn snapshot(&self) -> Vec<JournalOp> {
        let mut ops = vec![JournalOp::Counters {
            next_chat_id: self.next_chat_id,
            next_message_id: self.next_message_id,
        }];
        for chat in self.chats.values() {
            ops.push(JournalOp::ChatCreated { chat: chat.clone() });
            for message in self.messages_for_chat(chat.id) {
                ops.push(JournalOp::MessageCreated { message });
            }
        }
        ops
    }

    // ── invariants ───────────────────────────────────────────────────

    /// Check `op` against the store invariants without applying it.
    pub fn validate(&self, op: &JournalOp) -> Result<()> {
        match op {
            JournalOp::Counters { .. } => Ok(()),
            JournalOp::ChatCreated { chat } => {
                if self.chats.contains_key(&chat.id) {
                    return Err(Error::Conflict(format!("chat {} already exists", chat.id)));
                }
                Ok(())
            }
            JournalOp::ChatTitle { chat_id, .. } | JournalOp::ChatDeleted { chat_id } => {
                self.require_chat(*chat_id).map(|_| ())
            }
            JournalOp::MessageCreated { message } => {
                self.require_chat(message.chat_id)?;
                if self.messages.contains_key(&message.id) {
                    return Err(Error::Conflict(format!(
                        "message {} already exists",
                        message.id
                    )));
                }
                if !message.is_complete {
                    if message.role == ChatRole::User {
                        return Err(Error::Conflict(
                            "user messages are created complete".into(),
                        ));
                    }
                    if let Some(open) = self.incomplete_in_chat(message.chat_id).first() {
                        return Err(Error::Conflict(format!(
                            "chat {} already has in-flight message {}",
                            message.chat_id, open.id
                        )));
                    }
                }
                Ok(())
            }
            JournalOp::MessageAppended { message_id, .. } => {
                let current = self.require_message(*message_id)?;
                if current.is_complete {
                    return Err(Error::Conflict(format!(
                        "message {message_id} is complete and cannot change"
                    )));
                }
                Ok(())
            }
            JournalOp::MessageCompleted { message_id, .. } => {
                self.require_message(*message_id).map(|_| ())
            }
        }
    }

    fn require_chat(&self, chat_id: ChatId) -> Result<&Chat> {
        self.chats
            .get(&chat_id)
            .ok_or_else(|| Error::NotFound(format!("chat {chat_id}")))
    }

    fn require_message(&self, message_id: MessageId) -> Result<&ChatMessage> {
        self.messages
            .get(&message_id)
            .ok_or_else(|| Error::NotFound(format!("message {message_id}")))
    }

    // ── mutation ─────────────────────────────────────────────────────

    /// Apply a previously validated op.
    pub fn apply(&mut self, op: JournalOp) {
        match op {
            JournalOp::Counters {
                next_chat_id,
                next_message_id,
            } => {
                self.next_chat_id = self.next_chat_id.max(next_chat_id);
                self.next_message_id = self.next_message_id.max(next_message_id);
            }
            JournalOp::ChatCreated { chat } => {
                self.next_chat_id = self.next_chat_id.max(chat.id + 1);
                self.by_chat.entry(chat.id).or_default();
                self.chats.insert(chat.id, chat);
            }
            JournalOp::ChatTitle { chat_id, title, at } => {
                if let Some(chat) = self.chats.get_mut(&chat_id) {
                    chat.title = title;
                    chat.updated_at = at;
                }
            }
            JournalOp::ChatDeleted { chat_id } => {
                self.chats.remove(&chat_id);
                if let Some(ids) = self.by_chat.remove(&chat_id) {
                    for id in ids {
                        self.messages.remove(&id);
                    }
                }
            }
            JournalOp::MessageCreated { message } => {
                self.next_message_id = self.next_message_id.max(message.id + 1);
                if let Some(chat) = self.chats.get_mut(&message.chat_id) {
                    chat.updated_at = message.created_at;
                }
                self.by_chat
                    .entry(message.chat_id)
                    .or_default()
                    .push(message.id);
                self.messages.insert(message.id, message);
            }
            JournalOp::MessageAppended {
                message_id,
                delta,
                at,
            } => {
                if let Some(msg) = self.messages.get_mut(&message_id) {
                    msg.content.push_str(&delta);
                    msg.updated_at = at;
                }
            }
            JournalOp::MessageCompleted { message_id, at } => {
                if let Some(msg) = self.messages.get_mut(&message_id) {
                    if !msg.is_complete {
                        msg.is_complete = true;
                        msg.updated_at = at;
                    }
                }
            }
        }
    }
}
