//! WebSocket endpoints for chat turns.
//!
//! Flow:
//! 1. Client connects to `/v1/chats/:chat_id/ws` (single chat) or `/v1/ws`
//!    (multi chat), passing `?token=<bearer>` or an `Authorization` header
//! 2. The upgrade is accepted, then the caller is authenticated; failure
//!    closes the socket with code 1008
//! 3. Every inbound frame starts one turn; its events are written back as
//!    JSON frames until `done`. Frames arriving mid-turn are queued.
//! 4. The loop ends on client close, idle eviction or server shutdown.

use std::collections::VecDeque;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lx_domain::chat::ChatId;

use crate::auth::AuthUser;
use crate::runtime::{TurnEvent, TurnInput, TurnRejected};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query params / frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token; alternative to the `Authorization` header for
    /// clients that cannot set headers on the upgrade request.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SingleChatFrame {
    content: String,
}

#[derive(Debug, Deserialize)]
struct MultiChatFrame {
    chat_id: ChatId,
    message: String,
}

#[derive(Debug, Clone, Copy)]
enum Binding {
    /// Turns always target the chat in the URL.
    Single(ChatId),
    /// Each frame names its chat; outbound frames carry `chat_id`.
    Multi,
}

enum Outbound {
    Frame(Value),
    Close(CloseFrame<'static>),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /v1/chats/:chat_id/ws
pub async fn chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, Binding::Single(chat_id), query.token, headers)
    })
}

/// GET /v1/ws
pub async fn multi_chat_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Binding::Multi, query.token, headers))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    binding: Binding,
    token: Option<String>,
    headers: HeaderMap,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // 1. Authenticate after accept.
    let user = match state.auth.authenticate(token.as_deref(), &headers) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "websocket authentication failed");
            let _ = ws_sink
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
    };

    // 2. Register and start the writer task.
    let connections = state.connections.clone();
    let (conn_id, close) = connections.register(&user.user_id);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(64);

    let writer = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outbound::Frame(frame) => {
                    if send_ws_message(&mut ws_sink, &frame).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(frame) => {
                    let _ = ws_sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let mut conn = Connection {
        state: &state,
        conn_id,
        close,
        binding,
        user,
        outbound: outbound_tx,
        pending: VecDeque::new(),
        max_pending: state.config.chat.ws_max_pending_frames,
    };

    // 3. Reader loop.
    loop {
        let text = match conn.pending.pop_front() {
            Some(text) => text,
            None => {
                let msg = tokio::select! {
                    () = conn.close.cancelled() => break,
                    msg = ws_stream.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        connections.touch(&conn_id);
                        text
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {
                        connections.touch(&conn_id);
                        continue;
                    }
                }
            }
        };

        let Some((chat_id, content)) = conn.parse_frame(&text) else {
            tracing::warn!(%conn_id, frame = %text, "ignoring malformed websocket frame");
            continue;
        };
        if !conn.run_turn(chat_id, content, &mut ws_stream).await {
            break;
        }
    }

    // 4. Cleanup: say goodbye when the server closed us, then stop the writer.
    if conn.close.is_cancelled() {
        let _ = conn
            .outbound
            .send(Outbound::Close(CloseFrame {
                code: close_code::NORMAL,
                reason: "connection closed by server".into(),
            }))
            .await;
    }
    drop(conn);
    if tokio::time::timeout(std::time::Duration::from_secs(2), writer)
        .await
        .is_err()
    {
        tracing::debug!(%conn_id, "websocket writer did not finish in time");
    }
    connections.remove(&conn_id);
    tracing::info!(%conn_id, "websocket disconnected");
}

const PENDING_OVERFLOW: &str = "too many messages waiting, message dropped";

struct Connection<'a> {
    state: &'a AppState,
    conn_id: Uuid,
    close: CancellationToken,
    binding: Binding,
    user: AuthUser,
    outbound: mpsc::Sender<Outbound>,
    /// Text frames received while a turn was running.
    pending: VecDeque<String>,
    max_pending: usize,
}

impl Connection<'_> {
    fn parse_frame(&self, text: &str) -> Option<(ChatId, String)> {
        match self.binding {
            Binding::Single(chat_id) => serde_json::from_str::<SingleChatFrame>(text)
                .ok()
                .map(|f| (chat_id, f.content)),
            Binding::Multi => serde_json::from_str::<MultiChatFrame>(text)
                .ok()
                .map(|f| (f.chat_id, f.message)),
        }
    }

    async fn send(&self, frame: Value) -> bool {
        self.outbound.send(Outbound::Frame(frame)).await.is_ok()
    }

    /// Drop a frame that arrived with the queue full. The client gets an
    /// `error` frame when the dropped frame names a chat.
    async fn reject_overflow(&self, text: &str) -> bool {
        tracing::warn!(
            conn_id = %self.conn_id,
            queued = self.pending.len(),
            "websocket queue full, dropping frame"
        );
        let Some((chat_id, _)) = self.parse_frame(text) else {
            return true;
        };
        let error = TurnEvent::Error {
            content: PENDING_OVERFLOW.into(),
        };
        match encode_event(self.binding, chat_id, error) {
            Some(frame) => self.send(frame).await,
            None => true,
        }
    }

    /// Run one turn to completion. Returns false when the connection must
    /// end (client gone, writer gone, or closed by the server).
    async fn run_turn(
        &mut self,
        chat_id: ChatId,
        content: String,
        ws_stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    ) -> bool {
        let input = TurnInput {
            chat_id,
            user_id: self.user.user_id.clone(),
            content,
        };
        let started = tokio::select! {
            () = self.close.cancelled() => return false,
            started = self.state.orchestrator.start(input) => started,
        };
        let mut events = match started {
            Ok(handle) => {
                tracing::debug!(conn_id = %self.conn_id, turn_id = %handle.turn_id, chat_id, "turn accepted");
                handle.events
            }
            Err(rejected) => {
                tracing::info!(conn_id = %self.conn_id, chat_id, error = %rejected, "turn rejected");
                let frame = encode_event(
                    self.binding,
                    chat_id,
                    TurnEvent::Error {
                        content: match rejected {
                            TurnRejected::Internal(_) => "internal error".into(),
                            other => other.to_string(),
                        },
                    },
                );
                return match frame {
                    Some(frame) => self.send(frame).await,
                    None => true,
                };
            }
        };

        // Dropping `events` on any early return tells the turn the client
        // is gone; it still finalizes the stored reply.
        loop {
            tokio::select! {
                () = self.close.cancelled() => return false,
                inbound = ws_stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        self.state.connections.touch(&self.conn_id);
                        if self.pending.len() < self.max_pending {
                            self.pending.push_back(text);
                        } else if !self.reject_overflow(&text).await {
                            return false;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return false,
                    Some(Ok(_)) => self.state.connections.touch(&self.conn_id),
                },
                event = events.recv() => {
                    let Some(event) = event else { return true };
                    self.state.connections.touch(&self.conn_id);
                    if let Some(frame) = encode_event(self.binding, chat_id, event) {
                        if !self.send(frame).await {
                            return false;
                        }
                    }
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map a turn event onto the wire. `None` means the binding does not
/// carry this event.
fn encode_event(binding: Binding, chat_id: ChatId, event: TurnEvent) -> Option<Value> {
    match (binding, event) {
        (Binding::Single(_), TurnEvent::UserMessage { .. }) => None,
        (Binding::Single(_), event) => serde_json::to_value(&event).ok(),
        (Binding::Multi, TurnEvent::UserMessage { content, timestamp }) => Some(json!({
            "type": "message",
            "chat_id": chat_id,
            "role": "user",
            "content": content,
            "timestamp": timestamp,
        })),
        (Binding::Multi, TurnEvent::Title { content }) => Some(json!({
            "type": "title_update",
            "chat_id": chat_id,
            "title": content,
        })),
        (Binding::Multi, TurnEvent::Done { content }) => Some(json!({
            "type": "done",
            "chat_id": chat_id,
            "content": content,
            "timestamp": content,
        })),
        (Binding::Multi, event) => {
            let mut frame = serde_json::to_value(&event).ok()?;
            if let Some(obj) = frame.as_object_mut() {
                obj.insert("chat_id".into(), json!(chat_id));
            }
            Some(frame)
        }
    }
}

async fn send_ws_message(
    sink: &mut (impl SinkExt<Message> + Unpin),
    msg: &Value,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chat_frames_match_event_shape() {
        let frame = encode_event(
            Binding::Single(7),
            7,
            TurnEvent::Token {
                content: "你".into(),
            },
        )
        .unwrap();
        assert_eq!(frame, json!({"type": "token", "content": "你"}));

        let echo = encode_event(
            Binding::Single(7),
            7,
            TurnEvent::UserMessage {
                content: "hi".into(),
                timestamp: chrono::Utc::now(),
            },
        );
        assert!(echo.is_none());
    }

    #[test]
    fn multi_chat_done_carries_timestamp() {
        let at = chrono::Utc::now();
        let done = encode_event(Binding::Multi, 5, TurnEvent::Done { content: at }).unwrap();
        assert_eq!(done["type"], "done");
        assert_eq!(done["chat_id"], 5);
        assert_eq!(done["timestamp"], json!(at));
        assert_eq!(done["content"], done["timestamp"]);
    }

    #[test]
    fn multi_chat_frames_carry_chat_id() {
        let title = encode_event(
            Binding::Multi,
            3,
            TurnEvent::Title {
                content: "合同纠纷".into(),
            },
        )
        .unwrap();
        assert_eq!(
            title,
            json!({"type": "title_update", "chat_id": 3, "title": "合同纠纷"})
        );

        let need = encode_event(Binding::Multi, 3, TurnEvent::NeedFile { content: false }).unwrap();
        assert_eq!(need["type"], "need_file");
        assert_eq!(need["chat_id"], 3);

        let echo = encode_event(
            Binding::Multi,
            3,
            TurnEvent::UserMessage {
                content: "hi".into(),
                timestamp: chrono::Utc::now(),
            },
        )
        .unwrap();
        assert_eq!(echo["type"], "message");
        assert_eq!(echo["role"], "user");
    }
}
