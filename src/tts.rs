//! Remote speech synthesis client.
//!
//! One synthesis call per segment. The voice directive sent with each call
//! composes the fixed baseline persona instructions with an optional
//! per-segment override; concurrency control (one call per segment, ever)
//! lives in the preload scheduler, not here.

use crate::config::SynthesisConfig;
use crate::error::{ChatError, Result};
use crate::session::{SessionGuard, SessionToken};
use bytes::Bytes;
use tracing::info;

/// Converts one text segment plus voice directives into audio bytes.
pub struct SpeechSynthesizer {
    config: SynthesisConfig,
    client: reqwest::Client,
    guard: SessionGuard,
}

impl SpeechSynthesizer {
    #[must_use]
    pub fn new(config: SynthesisConfig, guard: SessionGuard) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            guard,
        }
    }

    /// Synthesize one segment.
    ///
    /// Returns `Ok(None)` when the turn was superseded while the call was
    /// in flight; the result is discarded without being cached.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures and non-2xx responses, but
    /// only while the turn is still current.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_directive: Option<&str>,
        token: SessionToken,
    ) -> Result<Option<Bytes>> {
        let instructions = compose_instructions(&self.config.base_instructions, voice_directive);
        let body = serde_json::json!({
            "model": self.config.model,
            "input": text,
            "voice": self.config.voice,
            "instructions": instructions,
            "speed": self.config.speed,
        });

        let response = match self.client.post(&self.config.url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                return self.fail_if_current(token, format!("synthesis request failed: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return self.fail_if_current(token, format!("synthesis endpoint returned {status}"));
        }

        let audio = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return self.fail_if_current(token, format!("synthesis body read failed: {e}"));
            }
        };

        if !self.guard.is_current(token) {
            return Ok(None);
        }

        info!("{token}: synthesized {} bytes for {} chars", audio.len(), text.chars().count());
        Ok(Some(audio))
    }

    fn fail_if_current(&self, token: SessionToken, message: String) -> Result<Option<Bytes>> {
        if self.guard.is_current(token) {
            Err(ChatError::Synthesis(message))
        } else {
            Ok(None)
        }
    }
}

/// Compose the baseline persona instructions with a per-segment directive.
fn compose_instructions(base: &str, directive: Option<&str>) -> String {
    match directive.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directive) => format!("{base} {directive}"),
        None => base.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn directive_is_appended_to_baseline() {
        assert_eq!(
            compose_instructions("Habla con calma.", Some("Suena emocionada.")),
            "Habla con calma. Suena emocionada."
        );
    }

    #[test]
    fn missing_or_blank_directive_keeps_baseline() {
        assert_eq!(compose_instructions("Base.", None), "Base.");
        assert_eq!(compose_instructions("Base.", Some("   ")), "Base.");
    }
}
