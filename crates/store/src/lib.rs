//! Durable conversation storage for lexchat.
//!
//! Chats and their ordered messages live behind the [`ConversationStore`]
//! trait. [`JournalStore`] keeps them in memory and records every
//! mutation in an append-only JSONL journal that is replayed on start.

pub mod journal;
pub mod state;
pub mod store;

pub use journal::JournalStore;
pub use state::{ConversationState, JournalOp};
pub use store::ConversationStore;
