//! In-memory registry of open chat WebSocket connections.
//!
//! Every connection holds a cancellation token derived from the server
//! shutdown token. The sweeper cancels connections that have been idle
//! longer than `chat.ws_idle_timeout_secs`; the handler observes the
//! cancellation and closes the socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lx_domain::trace::TraceEvent;

struct Connection {
    user_id: String,
    connected_at: DateTime<Utc>,
    last_activity: Instant,
    close: CancellationToken,
}

/// Summary returned by [`ConnectionRegistry::list`].
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub conn_id: Uuid,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    pub idle_secs: u64,
}

pub struct ConnectionRegistry {
    conns: RwLock<HashMap<Uuid, Connection>>,
    shutdown: CancellationToken,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl ConnectionRegistry {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
            shutdown,
        }
    }

    /// Register a connection. The returned token fires on idle eviction
    /// or server shutdown.
    pub fn register(&self, user_id: &str) -> (Uuid, CancellationToken) {
        let conn_id = Uuid::new_v4();
        let close = self.shutdown.child_token();
        self.conns.write().insert(
            conn_id,
            Connection {
                user_id: user_id.to_owned(),
                connected_at: Utc::now(),
                last_activity: Instant::now(),
                close: close.clone(),
            },
        );
        tracing::info!(%conn_id, user_id, "websocket registered");
        (conn_id, close)
    }

    /// Record activity (inbound frame or outbound event).
    pub fn touch(&self, conn_id: &Uuid) {
        if let Some(conn) = self.conns.write().get_mut(conn_id) {
            conn.last_activity = Instant::now();
        }
    }

    pub fn remove(&self, conn_id: &Uuid) {
        if self.conns.write().remove(conn_id).is_some() {
            tracing::info!(%conn_id, "websocket removed");
        }
    }

    /// Cancel and drop every connection idle for longer than `idle`.
    /// Returns the number evicted.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        let mut evicted = Vec::new();
        self.conns.write().retain(|conn_id, conn| {
            let idle_for = conn.last_activity.elapsed();
            if idle_for <= idle {
                return true;
            }
            conn.close.cancel();
            evicted.push((*conn_id, conn.user_id.clone(), idle_for.as_secs()));
            false
        });

        for (conn_id, user_id, idle_secs) in &evicted {
            TraceEvent::ConnectionSwept {
                conn_id: conn_id.to_string(),
                user_id: user_id.clone(),
                idle_secs: *idle_secs,
            }
            .emit();
        }
        evicted.len()
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.conns
            .read()
            .iter()
            .map(|(id, c)| ConnectionInfo {
                conn_id: *id,
                user_id: c.user_id.clone(),
                connected_at: c.connected_at,
                idle_secs: c.last_activity.elapsed().as_secs(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.conns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.read().is_empty()
    }
}

/// Periodically evict idle connections until `shutdown` fires.
pub fn spawn_sweeper(
    registry: Arc<ConnectionRegistry>,
    every: Duration,
    idle: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = registry.sweep_idle(idle);
                    if evicted > 0 {
                        tracing::info!(evicted, remaining = registry.len(), "idle websockets swept");
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_cancels_only_idle_connections() {
        let registry = ConnectionRegistry::default();
        let (stale, stale_close) = registry.register("u1");
        let (fresh, fresh_close) = registry.register("u2");

        std::thread::sleep(Duration::from_millis(30));
        registry.touch(&fresh);

        assert_eq!(registry.sweep_idle(Duration::from_millis(20)), 1);
        assert!(stale_close.is_cancelled());
        assert!(!fresh_close.is_cancelled());
        assert_eq!(registry.len(), 1);
        assert!(registry.list().iter().all(|c| c.conn_id != stale));
    }

    #[test]
    fn shutdown_cancels_every_connection() {
        let shutdown = CancellationToken::new();
        let registry = ConnectionRegistry::new(shutdown.clone());
        let (_, a) = registry.register("u1");
        let (_, b) = registry.register("u2");
        shutdown.cancel();
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[test]
    fn remove_forgets_connection() {
        let registry = ConnectionRegistry::default();
        let (id, _) = registry.register("u1");
        registry.remove(&id);
        assert!(registry.is_empty());
    }
}
