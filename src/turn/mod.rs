//! Turn orchestration: the chat entry point and its message types.

pub mod messages;
pub mod orchestrator;

pub use messages::{AudioEnded, ChatEvent, Segment, SpokenMessage, SynthState, Turn};
pub use orchestrator::TurnOrchestrator;
