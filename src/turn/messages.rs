//! Turn, segment and event types shared across orchestration stages.

use crate::session::SessionToken;
use crate::viseme::{MouthCue, estimate_cues};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Synthesis lifecycle of one segment. At most one synthesis call is ever
/// in flight per segment; the `Loading` state is the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynthState {
    /// No synthesis attempted yet.
    #[default]
    Pending,
    /// A synthesis call is in flight.
    Loading,
    /// Audio bytes are cached.
    Loaded,
    /// Synthesis failed; the segment will be skipped at playback.
    Error,
}

/// One unit of spoken output, as delivered by the inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Display text, also the synthesis input.
    pub text: String,
    /// Facial-expression tag for the avatar renderer.
    #[serde(default = "default_expression")]
    pub facial_expression: String,
    /// Animation tag for the avatar renderer.
    #[serde(default = "default_animation")]
    pub animation: String,
    /// Per-segment voice directive composed with the baseline persona
    /// instructions at synthesis time.
    #[serde(default)]
    pub tts_prompt: Option<String>,
}

fn default_expression() -> String {
    "default".to_owned()
}

fn default_animation() -> String {
    "Talking_1".to_owned()
}

impl Segment {
    /// A segment carrying only text, with default expression and animation.
    #[must_use]
    pub fn from_text(text: String) -> Self {
        Self {
            text,
            facial_expression: default_expression(),
            animation: default_animation(),
            tts_prompt: None,
        }
    }
}

/// The unit of work triggered by one user utterance.
#[derive(Debug, Clone)]
pub struct Turn {
    /// The utterance that started the turn.
    pub input: String,
    /// Session token owning the turn.
    pub token: SessionToken,
    /// Ordered reply segments.
    pub segments: Vec<Segment>,
    /// Token-budget warning from the inference endpoint, if any.
    pub warning: Option<String>,
    /// Opaque function-call results passed through to the UI.
    pub function_results: Option<serde_json::Value>,
    /// Set once every segment has finished playing.
    pub complete: bool,
}

/// Payload handed to the playback renderer for one segment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpokenMessage {
    /// Display text.
    pub text: String,
    /// Facial-expression tag.
    pub facial_expression: String,
    /// Animation tag.
    pub animation: String,
    /// Base64-encoded audio bytes.
    pub audio: String,
    /// Estimated mouth-cue track for lip-sync.
    pub lipsync: Vec<MouthCue>,
}

impl SpokenMessage {
    /// Build the renderer payload for a segment and its synthesized audio.
    #[must_use]
    pub fn new(segment: &Segment, audio: &[u8], per_char_ms: u64) -> Self {
        Self {
            text: segment.text.clone(),
            facial_expression: segment.facial_expression.clone(),
            animation: segment.animation.clone(),
            audio: BASE64.encode(audio),
            lipsync: estimate_cues(&segment.text, per_char_ms),
        }
    }
}

/// Broadcast payload announcing that the renderer finished playing audio.
///
/// This is one of the two equivalent completion paths (the other is
/// [`crate::turn::TurnOrchestrator::message_played`]); the sequencer is
/// idempotent under either or both occurring.
#[derive(Debug, Clone, Copy)]
pub struct AudioEnded;

/// Events emitted for UI and observability.
///
/// Intentionally lightweight so the orchestration path can emit them
/// without blocking; sends are best-effort.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The inference call for the current turn started or finished.
    Thinking { active: bool },
    /// Human-readable processing phase from the status poller.
    ProcessingStatus { phase: String },
    /// A segment's text was appended to the visible history.
    ResponseShown { text: String },
    /// The currently playing message changed.
    MessageChanged { message: SpokenMessage },
    /// The fallback timer fired for a segment that never signalled
    /// completion. Recoverable; playback advanced on its own.
    PlaybackFallback { index: usize },
    /// User-visible warning (e.g. empty input).
    Warning { text: String },
    /// User-visible error; the turn was terminated cleanly.
    Error { text: String },
    /// All segments of the current turn finished playing.
    TurnComplete,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn segment_deserializes_with_defaults() {
        let segment: Segment =
            serde_json::from_value(serde_json::json!({ "text": "Hola" })).unwrap();
        assert_eq!(segment.text, "Hola");
        assert_eq!(segment.facial_expression, "default");
        assert_eq!(segment.animation, "Talking_1");
        assert!(segment.tts_prompt.is_none());
    }

    #[test]
    fn segment_keeps_explicit_tags() {
        let segment: Segment = serde_json::from_value(serde_json::json!({
            "text": "¡Hola!",
            "facialExpression": "smile",
            "animation": "Waving",
            "ttsPrompt": "alegre"
        }))
        .unwrap();
        assert_eq!(segment.facial_expression, "smile");
        assert_eq!(segment.animation, "Waving");
        assert_eq!(segment.tts_prompt.as_deref(), Some("alegre"));
    }

    #[test]
    fn spoken_message_encodes_audio() {
        let segment = Segment::from_text("Hola".to_owned());
        let message = SpokenMessage::new(&segment, b"\x00\x01\x02", 80);
        assert_eq!(message.audio, "AAEC");
        assert!(!message.lipsync.is_empty());
    }
}
