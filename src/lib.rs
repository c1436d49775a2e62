//! Alma: turn orchestration for a spoken, animated avatar assistant.
//!
//! One user utterance becomes a spoken, animated multi-segment reply:
//! utterance → inference endpoint → per-segment speech synthesis →
//! strictly sequential playback driving the avatar's expression state.
//!
//! # Architecture
//!
//! Three asynchronous activities progress concurrently and are coordinated
//! by session tokens:
//! - **Response fetch**: one inference call per turn ([`fetch`])
//! - **Pre-synthesis**: segment 0 with top priority, the rest in
//!   background order ([`preload`], [`tts`])
//! - **Sequential playback**: one segment at a time with a completion
//!   fallback timer ([`playback`])
//!
//! A new utterance may arrive at any time; issuing a new session token
//! ([`session`]) atomically invalidates all outstanding work from the
//! previous turn. The independent processing-status poll ([`status`]) is
//! filtered by the same tokens.

pub mod config;
pub mod encoding;
pub mod error;
pub mod fetch;
pub mod playback;
pub mod preload;
pub mod session;
pub mod state;
pub mod status;
pub mod tts;
pub mod turn;
pub mod viseme;

pub use config::OrchestratorConfig;
pub use error::{ChatError, Result};
pub use playback::AudioSink;
pub use session::{SessionGuard, SessionToken};
pub use state::{ChatSnapshot, SharedState};
pub use status::StatusPoller;
pub use turn::messages::{AudioEnded, ChatEvent, Segment, SpokenMessage, Turn};
pub use turn::orchestrator::TurnOrchestrator;
