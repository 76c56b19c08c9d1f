//! Conversation orchestration: stream, gate, execute, repeat.

pub mod accumulator;
pub mod runner;
pub mod types;

pub use accumulator::StreamAccumulator;
pub use runner::{ConversationLoop, TurnHandle};
pub use types::{TurnRequest, TurnResult, TurnStatus};

/// Parameter key under which the session id is injected into every tool call.
pub const SESSION_ID_PARAM: &str = "session_id";
