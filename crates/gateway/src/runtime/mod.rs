//! Turn runtime: the orchestrator that ties the conversation store,
//! context assembly, LLM streaming and the auxiliary title / file-need
//! analyses into one sequence of [`TurnEvent`]s.

pub mod chat_lock;
pub mod file_need;
pub mod title;
pub mod turn;

pub use chat_lock::ChatLockMap;
pub use turn::{
    TurnEvent, TurnHandle, TurnInput, TurnOrchestrator, TurnPhase, TurnRejected, TurnTuning,
};
