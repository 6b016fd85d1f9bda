//! Prompt assembly for a chat turn.
//!
//! [`ContextAssembler`] turns the system prompt, recent history, retrieved
//! reference snippets and the new user message into the ordered message
//! list sent to the model, plus a [`ContextReport`] describing what was
//! kept and what was cut.

pub mod assembler;
pub mod injection;
pub mod report;
pub mod truncation;

pub use assembler::{ContextAssembler, DEFAULT_SYSTEM_PROMPT};
pub use report::ContextReport;
