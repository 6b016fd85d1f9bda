//! `lx-domain`: shared types for the lexchat workspace.
//!
//! Holds the error type, the config tree, persisted chat records, prompt
//! messages, provider stream events, and structured trace events. Every
//! other crate depends on this one and nothing here performs I/O.

pub mod chat;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod trace;
