pub mod auth;
pub mod chat;
pub mod chats;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (health, and the WebSocket endpoints
/// which authenticate after the upgrade) and **protected** (gated behind
/// the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health))
        .route("/v1/ws", get(crate::ws::multi_chat_ws))
        .route("/v1/chats/:chat_id/ws", get(crate::ws::chat_ws));

    let protected = Router::new()
        // Chats
        .route("/v1/chats", post(chats::create_chat).get(chats::list_chats))
        .route(
            "/v1/chats/:chat_id",
            get(chats::get_chat)
                .patch(chats::rename_chat)
                .delete(chats::delete_chat),
        )
        .route("/v1/chats/:chat_id/messages", get(chats::list_messages))
        // Turns
        .route(
            "/v1/chats/:chat_id/messages/stream",
            post(chat::stream_message),
        )
        .route_layer(middleware::from_fn_with_state(state, auth::require_user));

    public.merge(protected)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
