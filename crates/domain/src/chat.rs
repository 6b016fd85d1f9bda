//! Persisted conversation records.
//!
//! A [`Chat`] owns an ordered list of [`ChatMessage`]s. Only the newest
//! assistant message of a chat may be incomplete, and only while its turn
//! is in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder title for freshly created chats.
pub const DEFAULT_CHAT_TITLE: &str = "新对话";

pub type ChatId = i64;
pub type MessageId = i64;

/// Who authored a persisted message. History replay matches on this
/// exhaustively, so adding a variant is a compile-time change everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::User => f.write_str("user"),
            ChatRole::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub role: ChatRole,
    pub content: String,
    /// `false` only for an assistant placeholder whose stream is still
    /// running. Flips to `true` exactly once.
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chat together with its messages, as returned by detail endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ChatWithMessages {
    #[serde(flatten)]
    pub chat: Chat,
    pub messages: Vec<ChatMessage>,
}
