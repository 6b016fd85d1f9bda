//! Per-chat turn serialization.
//!
//! Turns on one chat run strictly one after another so each turn's
//! context read observes every write of the previous turn. Different
//! chats never contend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use lx_domain::chat::ChatId;
use lx_domain::error::{Error, Result};

/// Each chat id maps to a `Semaphore(1)`. The permit travels with the
/// turn task and is released when the turn has finalized.
pub struct ChatLockMap {
    locks: Mutex<HashMap<ChatId, Arc<Semaphore>>>,
}

impl Default for ChatLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until no other turn holds `chat_id`.
    pub async fn acquire(&self, chat_id: ChatId) -> Result<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(chat_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        if let Ok(permit) = sem.clone().try_acquire_owned() {
            return Ok(permit);
        }
        tracing::debug!(chat_id, "waiting for in-flight turn to finish");

        sem.acquire_owned()
            .await
            .map_err(|_| Error::Other(format!("turn lock for chat {chat_id} closed")))
    }

    /// True while a turn holds the chat.
    pub fn is_busy(&self, chat_id: ChatId) -> bool {
        self.locks
            .lock()
            .get(&chat_id)
            .map(|sem| sem.available_permits() == 0)
            .unwrap_or(false)
    }

    /// Number of tracked chats (for monitoring).
    pub fn chat_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Forget semaphores nobody holds or waits on.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| Arc::strong_count(sem) > 1 || sem.available_permits() == 0);
    }
}
