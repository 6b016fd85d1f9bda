use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding `conversations.jsonl`.
    #[serde(default = "d_state_dir")]
    pub state_dir: PathBuf,
    /// Rewrite the journal as a compact snapshot after replay.
    #[serde(default)]
    pub compact_on_start: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: d_state_dir(),
            compact_on_start: false,
        }
    }
}

fn d_state_dir() -> PathBuf {
    PathBuf::from("./data")
}
