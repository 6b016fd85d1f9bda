//! Chat CRUD endpoints.
//!
//! Every handler scopes to the authenticated caller: chats owned by
//! someone else are indistinguishable from missing ones (404).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;

use lx_domain::chat::{Chat, ChatId, ChatWithMessages};
use lx_domain::error::Error;

use crate::auth::AuthUser;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameChatRequest {
    pub title: String,
}

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub(crate) fn store_error(e: Error) -> Response {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "store request failed");
        return api_error(status, "internal error");
    }
    api_error(status, e.to_string())
}

/// Load a chat owned by `user`, or the 404 to return.
async fn owned_chat(state: &AppState, user: &AuthUser, chat_id: ChatId) -> Result<Chat, Response> {
    match state.store.get_chat(chat_id).await {
        Ok(Some(chat)) if chat.user_id == user.user_id => Ok(chat),
        Ok(_) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("chat {chat_id} not found"),
        )),
        Err(e) => Err(store_error(e)),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Option<Json<CreateChatRequest>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(state.config.chat.default_title.as_str());

    match state.store.create_chat(&user.user_id, Some(title)).await {
        Ok(chat) => {
            tracing::info!(chat_id = chat.id, user_id = %user.user_id, "chat created");
            (StatusCode::CREATED, Json(chat)).into_response()
        }
        Err(e) => store_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/chats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    match state.store.list_chats(&user.user_id).await {
        Ok(chats) => Json(serde_json::json!({
            "count": chats.len(),
            "chats": chats,
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/chats/:chat_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(chat_id): Path<ChatId>,
) -> Response {
    let chat = match owned_chat(&state, &user, chat_id).await {
        Ok(chat) => chat,
        Err(resp) => return resp,
    };
    match state.store.list_messages(chat_id).await {
        Ok(messages) => Json(ChatWithMessages { chat, messages }).into_response(),
        Err(e) => store_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATCH /v1/chats/:chat_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn rename_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(chat_id): Path<ChatId>,
    Json(body): Json<RenameChatRequest>,
) -> Response {
    let title = body.title.trim();
    if title.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "title must not be empty");
    }
    if let Err(resp) = owned_chat(&state, &user, chat_id).await {
        return resp;
    }
    if let Err(e) = state.store.update_chat_title(chat_id, title).await {
        return store_error(e);
    }
    match owned_chat(&state, &user, chat_id).await {
        Ok(chat) => Json(chat).into_response(),
        Err(resp) => resp,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /v1/chats/:chat_id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(chat_id): Path<ChatId>,
) -> Response {
    if let Err(resp) = owned_chat(&state, &user, chat_id).await {
        return resp;
    }
    // Wait for an in-flight turn so its final writes land before the
    // cascade removes them.
    let _permit = match state.chat_locks.acquire(chat_id).await {
        Ok(p) => p,
        Err(e) => return store_error(e),
    };
    match state.store.delete_chat(chat_id).await {
        Ok(()) => {
            tracing::info!(chat_id, user_id = %user.user_id, "chat deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => store_error(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/chats/:chat_id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(chat_id): Path<ChatId>,
) -> Response {
    if let Err(resp) = owned_chat(&state, &user, chat_id).await {
        return resp;
    }
    match state.store.list_messages(chat_id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => store_error(e),
    }
}
