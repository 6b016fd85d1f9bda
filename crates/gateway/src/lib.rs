//! `lx-gateway`: HTTP and WebSocket front end for lexchat.
//!
//! Wires the conversation store, the LLM provider and document retrieval
//! into the [`runtime::TurnOrchestrator`], and exposes it over SSE and
//! WebSocket transports alongside a small chat CRUD API.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
pub mod ws;
