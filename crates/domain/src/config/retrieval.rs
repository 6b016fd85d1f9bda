use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document retrieval service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection to the external per-user document search service.
///
/// Disabled by default: turns then run without reference material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "d_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_3")]
    pub top_k: u32,
    #[serde(default = "d_5000")]
    pub timeout_ms: u64,
    #[serde(default = "d_2")]
    pub max_retries: u32,
    /// Per-snippet character cap inside the reference block.
    #[serde(default = "d_2000")]
    pub max_snippet_chars: usize,
    /// Character cap for the whole reference block.
    #[serde(default = "d_6000")]
    pub max_reference_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: d_url(),
            api_key: None,
            top_k: 3,
            timeout_ms: 5000,
            max_retries: 2,
            max_snippet_chars: 2000,
            max_reference_chars: 6000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_url() -> String {
    "http://localhost:8100".into()
}
fn d_3() -> u32 {
    3
}
fn d_2() -> u32 {
    2
}
fn d_5000() -> u64 {
    5000
}
fn d_2000() -> usize {
    2000
}
fn d_6000() -> usize {
    6000
}
