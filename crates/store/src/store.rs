use lx_domain::chat::{Chat, ChatId, ChatMessage, ChatRole, MessageId};
use lx_domain::error::Result;

/// Durable record of chats and their messages.
///
/// Writes are single-row operations. Implementations enforce:
/// - at most one incomplete message per chat;
/// - user messages are created complete;
/// - a completed message never changes again;
/// - content of an incomplete message only grows.
///
/// Violations return `Error::Conflict`; unknown ids return
/// `Error::NotFound`.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_chat(&self, user_id: &str, title: Option<&str>) -> Result<Chat>;

    async fn get_chat(&self, chat_id: ChatId) -> Result<Option<Chat>>;

    /// Chats owned by `user_id`, most recently updated first.
    async fn list_chats(&self, user_id: &str) -> Result<Vec<Chat>>;

    async fn update_chat_title(&self, chat_id: ChatId, title: &str) -> Result<()>;

    /// Delete a chat together with all of its messages.
    async fn delete_chat(&self, chat_id: ChatId) -> Result<()>;

    async fn create_message(
        &self,
        chat_id: ChatId,
        role: ChatRole,
        content: &str,
        is_complete: bool,
    ) -> Result<ChatMessage>;

    /// Append `delta` to an incomplete message.
    async fn append_to_message(&self, message_id: MessageId, delta: &str) -> Result<()>;

    /// Replace the content of an incomplete message. The new content must
    /// extend the stored content.
    async fn update_message_content(&self, message_id: MessageId, content: &str) -> Result<()>;

    /// Mark a message complete. Calling this on a complete message is a
    /// no-op.
    async fn mark_complete(&self, message_id: MessageId) -> Result<()>;

    async fn get_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>>;

    /// Messages of a chat in creation order.
    async fn list_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>>;

    async fn incomplete_messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>>;
}
