//! Configuration types for the avatar chat orchestrator.

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Inference endpoint settings.
    pub chat: ChatEndpointConfig,
    /// Speech synthesis settings.
    pub synthesis: SynthesisConfig,
    /// Background pre-synthesis settings.
    pub preload: PreloadConfig,
    /// Sequential playback settings.
    pub playback: PlaybackConfig,
    /// Processing-status polling settings.
    pub status: StatusConfig,
    /// Turn submission settings.
    pub turn: TurnConfig,
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!("failed to read config ({}): {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            ChatError::Config(format!("invalid config ({}): {e}", path.display()))
        })
    }
}

/// Inference endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatEndpointConfig {
    /// Base URL of the backend serving `/chat/` and `/status/`.
    pub base_url: String,
    /// User identifier sent with every request.
    pub user_id: String,
    /// Assistant role identifier sent with every request.
    pub role_id: String,
}

impl Default for ChatEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_owned(),
            user_id: String::new(),
            role_id: String::new(),
        }
    }
}

/// Speech synthesis endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Synthesis endpoint URL.
    pub url: String,
    /// Synthesis model name.
    pub model: String,
    /// Voice name.
    pub voice: String,
    /// Playback speed multiplier.
    pub speed: f32,
    /// Baseline persona instructions composed with any per-segment
    /// voice directive.
    pub base_instructions: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/audio-synthesis".to_owned(),
            model: "gpt-4o-mini-tts".to_owned(),
            voice: "nova".to_owned(),
            speed: 1.0,
            base_instructions: "Habla en español con calidez y naturalidad, \
                                como una asistente cercana."
                .to_owned(),
        }
    }
}

/// Background pre-synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Short transitional filler phrases. One is chosen at random and
    /// prefixed to every segment after the first so multi-segment speech
    /// flows naturally.
    pub fillers: Vec<String>,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            fillers: vec![
                "Mmm... ".to_owned(),
                "A ver... ".to_owned(),
                "Bueno... ".to_owned(),
                "Pues... ".to_owned(),
                "Eh... ".to_owned(),
            ],
        }
    }
}

/// Sequential playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Minimum fallback-timer duration in milliseconds.
    ///
    /// If no completion signal arrives within
    /// `max(fallback_floor_ms, text_chars * fallback_per_char_ms)` the
    /// sequencer advances on its own, so a missed signal can never hang a
    /// turn. The formula is a heuristic; both knobs are tunable.
    pub fallback_floor_ms: u64,
    /// Per-character fallback allowance in milliseconds.
    pub fallback_per_char_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            fallback_floor_ms: 6_000,
            fallback_per_char_ms: 80,
        }
    }
}

/// Processing-status polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Delay between enabling the poller and its first poll.
    pub start_delay_ms: u64,
    /// Fixed delay between polls.
    pub interval_ms: u64,
    /// Per-request timeout. A status check has no playback consequence, so
    /// it gets a short hard timeout instead of abort-on-new-session.
    pub request_timeout_ms: u64,
    /// After a disable, results arriving within this window of a re-enable
    /// are ignored so a disable/enable race cannot reinstate a stale phase.
    pub reenable_cooldown_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: 500,
            interval_ms: 1_200,
            request_timeout_ms: 3_000,
            reenable_cooldown_ms: 400,
        }
    }
}

/// Turn submission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Window in which an identical utterance is treated as a double-fire
    /// from overlapping input channels (typed + voice) and dropped.
    pub duplicate_window_ms: u64,
    /// Delay before the status poller is enabled for a turn, so a fast
    /// response never flashes a processing indicator.
    pub status_enable_delay_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            duplicate_window_ms: 2_000,
            status_enable_delay_ms: 800,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.playback.fallback_floor_ms, 6_000);
        assert_eq!(config.playback.fallback_per_char_ms, 80);
        assert_eq!(config.turn.duplicate_window_ms, 2_000);
        assert!(!config.preload.fillers.is_empty());
    }

    #[test]
    fn load_parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alma.toml");
        std::fs::write(
            &path,
            r#"
[chat]
base_url = "http://backend.local"
user_id = "u1"
role_id = "r1"

[playback]
fallback_floor_ms = 4000
"#,
        )
        .unwrap();

        let config = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(config.chat.base_url, "http://backend.local");
        assert_eq!(config.playback.fallback_floor_ms, 4_000);
        // Untouched sections keep their defaults.
        assert_eq!(config.playback.fallback_per_char_ms, 80);
        assert_eq!(config.status.interval_ms, 1_200);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[chat\nbase_url = ").unwrap();
        assert!(OrchestratorConfig::load(&path).is_err());
    }
}
