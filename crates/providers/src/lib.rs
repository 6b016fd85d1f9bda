//! LLM streaming client.
//!
//! [`LlmProvider`] is the seam the turn orchestrator talks to; the only
//! production adapter is [`OpenAiCompatProvider`], which speaks the OpenAI
//! chat-completions wire format (DashScope compatible mode by default).

pub mod deltas;
pub mod openai_compat;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use deltas::text_deltas;
pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
pub use util::resolve_api_key;
