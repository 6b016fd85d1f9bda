use serde::{Deserialize, Serialize};

use crate::chat::DEFAULT_CHAT_TITLE;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat turn tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Knobs for the turn orchestrator and the WebSocket transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Number of trailing history messages replayed into the prompt.
    #[serde(default = "d_10")]
    pub history_window: usize,
    /// Minimum gap between two checkpoint writes of the in-flight
    /// assistant message. `0` writes after every delta.
    #[serde(default = "d_250")]
    pub checkpoint_interval_ms: u64,
    /// Character budget for generated chat titles.
    #[serde(default = "d_15")]
    pub title_max_chars: usize,
    /// Title given to chats created without one.
    #[serde(default = "d_default_title")]
    pub default_title: String,
    /// Token sent to the client when the upstream stream fails.
    #[serde(default = "d_apology")]
    pub apology: String,
    /// Upper bound for each auxiliary analysis (title, file-need).
    #[serde(default = "d_15000u")]
    pub aux_timeout_ms: u64,
    /// Replaces the built-in legal-advisor system prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Capacity of the per-turn event channel.
    #[serde(default = "d_64")]
    pub event_buffer: usize,
    /// WebSocket connections with no traffic for this long are closed.
    #[serde(default = "d_60u")]
    pub ws_idle_timeout_secs: u64,
    /// How often the idle-connection sweeper runs.
    #[serde(default = "d_30u")]
    pub ws_sweep_interval_secs: u64,
    /// Frames a WebSocket may queue while one of its turns is running.
    /// Further frames are dropped with an `error` frame.
    #[serde(default = "d_16")]
    pub ws_max_pending_frames: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            checkpoint_interval_ms: 250,
            title_max_chars: 15,
            default_title: d_default_title(),
            apology: d_apology(),
            aux_timeout_ms: 15_000,
            system_prompt: None,
            event_buffer: 64,
            ws_idle_timeout_secs: 60,
            ws_sweep_interval_secs: 30,
            ws_max_pending_frames: 16,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_10() -> usize {
    10
}
fn d_15() -> usize {
    15
}
fn d_16() -> usize {
    16
}
fn d_64() -> usize {
    64
}
fn d_250() -> u64 {
    250
}
fn d_15000u() -> u64 {
    15_000
}
fn d_60u() -> u64 {
    60
}
fn d_30u() -> u64 {
    30
}
fn d_default_title() -> String {
    DEFAULT_CHAT_TITLE.into()
}
fn d_apology() -> String {
    "抱歉，我现在无法回答您的问题。请稍后再试。".into()
}
