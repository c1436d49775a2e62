//! Error types for the turn orchestration system.

/// Top-level error type for the avatar chat orchestrator.
///
/// A turn superseded by a newer session is *not* an error: every operation
/// that can be invalidated returns `Option::None` for that case instead.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Inference endpoint transport or protocol error.
    #[error("chat error: {0}")]
    Chat(String),

    /// Speech synthesis error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio playback error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Status polling error.
    #[error("status error: {0}")]
    Status(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;
