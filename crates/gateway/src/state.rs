use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use lx_domain::config::Config;
use lx_store::ConversationStore;

use crate::auth::Authenticator;
use crate::runtime::{ChatLockMap, TurnOrchestrator};
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    pub orchestrator: Arc<TurnOrchestrator>,
    /// Same map the orchestrator uses; chat deletion waits on it too.
    pub chat_locks: Arc<ChatLockMap>,
    pub auth: Arc<Authenticator>,
    pub connections: Arc<ConnectionRegistry>,
    /// Cancelled once on shutdown; open sockets and background loops
    /// observe it.
    pub shutdown: CancellationToken,
}
