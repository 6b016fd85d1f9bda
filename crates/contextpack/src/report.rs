use serde::{Deserialize, Serialize};

/// What went into an assembled prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextReport {
    /// History entries included in the prompt.
    pub history_messages: usize,
    /// Entries left out by the window or because they were empty.
    pub history_dropped: usize,
    pub snippets_included: usize,
    /// Snippets cut by the per-snippet or total cap.
    pub snippets_truncated: usize,
    /// Characters in the reference block (0 when no snippets).
    pub reference_chars: usize,
    pub system_chars: usize,
}
