//! Streaming chat endpoint.
//!
//! `POST /v1/chats/:chat_id/messages/stream` runs one turn and streams its
//! events as Server-Sent Events:
//!
//! | turn event  | SSE frame                          |
//! |-------------|------------------------------------|
//! | token       | `data: <text>` (default event)     |
//! | title       | `event: title`                     |
//! | need_file   | `event: need_file`, `true`/`false` |
//! | error       | `event: error`                     |
//! | done        | `event: done`, RFC 3339 timestamp  |

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::stream::Stream;
use serde::Deserialize;

use lx_domain::chat::ChatId;

use crate::api::chats::api_error;
use crate::auth::AuthUser;
use crate::runtime::{TurnEvent, TurnInput, TurnRejected};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

pub async fn stream_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<SendMessageRequest>,
) -> Response {
    let input = TurnInput {
        chat_id,
        user_id: user.user_id,
        content: body.content,
    };
    let handle = match state.orchestrator.start(input).await {
        Ok(handle) => handle,
        Err(rejected) => {
            let status = match &rejected {
                TurnRejected::EmptyContent => StatusCode::BAD_REQUEST,
                TurnRejected::ChatNotFound(_) => StatusCode::NOT_FOUND,
                TurnRejected::Internal(e) => {
                    tracing::error!(error = %e, chat_id, "could not start turn");
                    return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
                }
            };
            return api_error(status, rejected.to_string());
        }
    };
    tracing::debug!(turn_id = %handle.turn_id, chat_id, "streaming turn over sse");

    Sse::new(make_sse_stream(handle.events))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// When the client stops reading, axum drops this stream and with it the
/// receiver; the turn notices and finalizes on its own.
fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            if let Some(frame) = sse_event(event) {
                yield Ok(frame);
            }
        }
    }
}

fn sse_event(event: TurnEvent) -> Option<Event> {
    let frame = match event {
        TurnEvent::UserMessage { .. } => return None,
        TurnEvent::Token { content } => Event::default().data(sse_lines(&content)),
        TurnEvent::Title { content } => Event::default().event("title").data(sse_lines(&content)),
        TurnEvent::NeedFile { content } => Event::default()
            .event("need_file")
            .data(if content { "true" } else { "false" }),
        TurnEvent::Error { content } => Event::default().event("error").data(sse_lines(&content)),
        TurnEvent::Done { content } => Event::default()
            .event("done")
            .data(content.to_rfc3339()),
    };
    Some(frame)
}

/// `Event::data` splits on `\n` into several `data:` lines but rejects
/// `\r`, so CRLF and bare CR become LF. Clients rejoin the lines with `\n`.
fn sse_lines(text: &str) -> std::borrow::Cow<'_, str> {
    if text.contains('\r') {
        text.replace("\r\n", "\n").replace('\r', "\n").into()
    } else {
        text.into()
    }
}
