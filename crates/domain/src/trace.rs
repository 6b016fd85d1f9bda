use serde::Serialize;

/// Structured trace events emitted across all lexchat crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ContextAssembled {
        chat_id: i64,
        history_messages: usize,
        history_dropped: usize,
        snippets_included: usize,
        snippets_truncated: usize,
        reference_chars: usize,
    },
    RetrievalCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
    },
    TurnFinished {
        turn_id: String,
        chat_id: i64,
        outcome: String,
        deltas: usize,
        chars: usize,
        duration_ms: u64,
    },
    TitleUpdated {
        chat_id: i64,
        old_title: String,
        new_title: String,
    },
    StoreReplayed {
        chats: usize,
        messages: usize,
        skipped_lines: usize,
        recovered_incomplete: usize,
    },
    ConnectionSwept {
        conn_id: String,
        user_id: String,
        idle_secs: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "lx_event");
    }
}
