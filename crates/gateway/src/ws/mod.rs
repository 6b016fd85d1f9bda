//! WebSocket chat transport and its connection registry.

pub mod handler;
pub mod registry;

pub use handler::{chat_ws, multi_chat_ws};
pub use registry::{spawn_sweeper, ConnectionRegistry};
