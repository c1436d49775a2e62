//! Strictly sequential segment playback.
//!
//! One segment plays at a time, system-wide. Completion is signalled by the
//! playback renderer through either of two equivalent paths (direct
//! callback or the audio-ended broadcast); the sequencer accepts at most
//! one logical completion per segment, so double delivery is harmless. A
//! duration-based fallback timer guarantees the turn can never hang on a
//! missed signal.

use crate::config::PlaybackConfig;
use crate::error::Result;
use crate::preload::PreloadScheduler;
use crate::session::SessionGuard;
use crate::state::SharedState;
use crate::turn::messages::{ChatEvent, SpokenMessage, Turn};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Seam to the external playback renderer.
///
/// `play` starts rendering one spoken message and returns once rendering
/// has begun; completion arrives out-of-band via the completion paths. The
/// core assumes nothing about the notification transport.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Begin rendering one spoken message.
    ///
    /// # Errors
    ///
    /// Returns an error when rendering cannot start; the sequencer treats
    /// that as the segment's end signal and advances.
    async fn play(&self, message: &SpokenMessage) -> Result<()>;

    /// Stop any rendering in progress.
    async fn stop(&self);
}

/// At-most-one completion delivery per playing segment.
///
/// `arm` opens a delivery window for the segment about to play; `signal`
/// completes the window exactly once, and any further signals (duplicate
/// path delivery, late signals between segments) are dropped.
pub(crate) struct PlaybackSignal {
    delivered: Mutex<bool>,
    notify: Notify,
}

impl PlaybackSignal {
    pub(crate) fn new() -> Self {
        Self {
            delivered: Mutex::new(false),
            notify: Notify::new(),
        }
    }

    /// Deliver a completion for whichever segment is currently playing.
    pub(crate) fn signal(&self) {
        if let Ok(mut delivered) = self.delivered.lock() {
            if *delivered {
                return;
            }
            *delivered = true;
        }
        self.notify.notify_waiters();
    }

    /// Open a fresh delivery window, dropping any signal that arrived
    /// since the previous segment ended.
    fn arm(&self) {
        if let Ok(mut delivered) = self.delivered.lock() {
            *delivered = false;
        }
    }

    async fn wait(&self) {
        loop {
            // Register before checking so a signal racing the check is
            // not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.delivered.lock().map(|d| *d).unwrap_or(false) {
                return;
            }
            notified.await;
        }
    }
}

/// Plays a turn's segments in origin-index order.
pub struct PlaybackSequencer {
    sink: Arc<dyn AudioSink>,
    guard: SessionGuard,
    config: PlaybackConfig,
    signal: Arc<PlaybackSignal>,
    state: SharedState,
}

impl PlaybackSequencer {
    pub(crate) fn new(
        sink: Arc<dyn AudioSink>,
        guard: SessionGuard,
        config: PlaybackConfig,
        signal: Arc<PlaybackSignal>,
        state: SharedState,
    ) -> Self {
        Self {
            sink,
            guard,
            config,
            signal,
            state,
        }
    }

    /// Play every segment of the turn in order.
    ///
    /// Per segment: announce (text shown, history appended), stop any prior
    /// playback, play, then wait for the end signal bounded by the fallback
    /// timer. A segment whose synthesis failed is announced and skipped
    /// silently. Returns whether any audio started; exits quietly as soon
    /// as the turn goes stale.
    pub async fn play_all(&self, turn: &Turn, preload: &PreloadScheduler) -> bool {
        let mut played_any = false;

        for (index, segment) in turn.segments.iter().enumerate() {
            if !self.guard.is_current(turn.token) {
                return played_any;
            }

            let audio = match preload.fetch(segment, index, turn.token).await {
                Ok(Some(audio)) => Some(audio),
                Ok(None) => return played_any,
                Err(e) => {
                    warn!("{}: skipping segment {index}: {e}", turn.token);
                    None
                }
            };

            self.announce(segment.text.clone());

            let Some(audio) = audio else {
                // Silent advance: the text is shown, nothing plays.
                continue;
            };

            let message = SpokenMessage::new(segment, &audio, self.config.fallback_per_char_ms);

            // Only one playing segment exists system-wide.
            self.sink.stop().await;
            self.signal.arm();
            if !self.guard.is_current(turn.token) {
                return played_any;
            }

            self.state.update(|s| s.message = Some(message.clone()));
            self.state.emit(ChatEvent::MessageChanged {
                message: message.clone(),
            });

            if let Err(e) = self.sink.play(&message).await {
                // A playback error is an end signal, not a turn abort.
                warn!("{}: playback error on segment {index}: {e}", turn.token);
                continue;
            }
            played_any = true;

            let fallback = fallback_duration(&segment.text, &self.config);
            tokio::select! {
                () = self.signal.wait() => {
                    info!("{}: segment {index} ended", turn.token);
                }
                () = tokio::time::sleep(fallback) => {
                    warn!(
                        "{}: no end signal for segment {index} within {}ms, advancing",
                        turn.token,
                        fallback.as_millis()
                    );
                    self.state.emit(ChatEvent::PlaybackFallback { index });
                }
            }
        }

        played_any
    }

    fn announce(&self, text: String) {
        self.state.update(|s| s.display_responses.push(text.clone()));
        self.state.emit(ChatEvent::ResponseShown { text });
    }
}

/// How long to wait for an end signal before advancing on our own.
fn fallback_duration(text: &str, config: &PlaybackConfig) -> Duration {
    let by_length = text.chars().count() as u64 * config.fallback_per_char_ms;
    Duration::from_millis(by_length.max(config.fallback_floor_ms))
}
