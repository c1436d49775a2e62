//! Top-level turn orchestration.
//!
//! `chat(text)` is the single entry point: it invalidates everything the
//! previous turn owned (in-flight fetch, queued audio, scheduled fallback
//! timers, stale status updates) by issuing a fresh session token, then
//! drives fetch → pre-synthesis → sequential playback for the new turn.

use crate::config::OrchestratorConfig;
use crate::error::ChatError;
use crate::fetch::ResponseFetcher;
use crate::playback::{AudioSink, PlaybackSequencer, PlaybackSignal};
use crate::preload::PreloadScheduler;
use crate::session::{SessionGuard, SessionToken};
use crate::state::{ChatSnapshot, SharedState};
use crate::status::StatusPoller;
use crate::tts::SpeechSynthesizer;
use crate::turn::messages::{AudioEnded, ChatEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const AUDIO_ENDED_CHANNEL_SIZE: usize = 16;

/// Coordinates one turn at a time. Cloning shares the orchestrator, so
/// handles can be passed freely to UI callbacks.
#[derive(Clone)]
pub struct TurnOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    guard: SessionGuard,
    state: SharedState,
    fetcher: ResponseFetcher,
    preload: PreloadScheduler,
    sequencer: PlaybackSequencer,
    status: StatusPoller,
    sink: Arc<dyn AudioSink>,
    signal: Arc<PlaybackSignal>,
    audio_ended: broadcast::Sender<AudioEnded>,
    client: reqwest::Client,
    /// Aborts the previous turn's in-flight fetch on a new submission.
    fetch_cancel: Mutex<CancellationToken>,
    /// Duplicate-submission tracker (typed + voice double-fire).
    last_submission: Mutex<Option<(String, Instant)>>,
}

impl TurnOrchestrator {
    /// Build an orchestrator around a playback renderer.
    ///
    /// Must be called within a tokio runtime: the orchestrator spawns a
    /// listener that forwards the audio-ended broadcast into the playback
    /// completion signal.
    #[must_use]
    pub fn new(config: OrchestratorConfig, sink: Arc<dyn AudioSink>) -> Self {
        let guard = SessionGuard::new();
        let state = SharedState::new();
        let signal = Arc::new(PlaybackSignal::new());

        let synth = Arc::new(SpeechSynthesizer::new(
            config.synthesis.clone(),
            guard.clone(),
        ));
        let preload = PreloadScheduler::new(synth, guard.clone(), config.preload.fillers.clone());
        let sequencer = PlaybackSequencer::new(
            Arc::clone(&sink),
            guard.clone(),
            config.playback.clone(),
            Arc::clone(&signal),
            state.clone(),
        );
        let fetcher = ResponseFetcher::new(config.chat.clone(), guard.clone());
        let status = StatusPoller::new(
            config.status.clone(),
            config.chat.clone(),
            guard.clone(),
            state.clone(),
        );

        let (audio_ended, ended_rx) = broadcast::channel(AUDIO_ENDED_CHANNEL_SIZE);
        spawn_audio_ended_listener(ended_rx, Arc::clone(&signal));

        Self {
            inner: Arc::new(Inner {
                config,
                guard,
                state,
                fetcher,
                preload,
                sequencer,
                status,
                sink,
                signal,
                audio_ended,
                client: reqwest::Client::new(),
                fetch_cancel: Mutex::new(CancellationToken::new()),
                last_submission: Mutex::new(None),
            }),
        }
    }

    /// Submit one utterance.
    ///
    /// Empty input is rejected with a warning and no state change. An
    /// identical utterance resubmitted within the duplicate window is
    /// dropped. Otherwise the previous turn is invalidated synchronously
    /// and the new turn runs asynchronously.
    pub fn chat(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.inner.state.emit(ChatEvent::Warning {
                text: "Escribe un mensaje antes de enviar.".to_owned(),
            });
            return;
        }
        if self.is_duplicate(trimmed) {
            debug!("duplicate submission dropped: {trimmed:?}");
            return;
        }

        let token = self.inner.guard.new_session();
        info!("{token}: new turn");

        // Everything from the previous turn goes stale under the new token;
        // additionally abort its in-flight fetch so the socket is released.
        let cancel = CancellationToken::new();
        if let Ok(mut slot) = self.inner.fetch_cancel.lock() {
            std::mem::replace(&mut *slot, cancel.clone()).cancel();
        }
        self.inner.status.disable();
        self.inner.state.begin_turn();

        let this = self.clone();
        let input = trimmed.to_owned();
        tokio::spawn(async move {
            this.run_turn(input, token, cancel).await;
        });
    }

    /// Authoritative completion signal from the playback renderer for the
    /// currently playing segment. Equivalent to an audio-ended broadcast;
    /// duplicate delivery over either or both paths is harmless.
    pub fn message_played(&self) {
        self.inner.signal.signal();
    }

    /// Sender half of the audio-ended broadcast, for renderers that
    /// announce completion over a channel instead of a direct callback.
    #[must_use]
    pub fn audio_ended_sender(&self) -> broadcast::Sender<AudioEnded> {
        self.inner.audio_ended.clone()
    }

    /// Current observable state.
    #[must_use]
    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.state.snapshot()
    }

    /// Subscribe to state-change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.state.subscribe()
    }

    fn is_duplicate(&self, text: &str) -> bool {
        let window = Duration::from_millis(self.inner.config.turn.duplicate_window_ms);
        let Ok(mut last) = self.inner.last_submission.lock() else {
            return false;
        };
        if let Some((prev, at)) = last.as_ref()
            && prev == text
            && at.elapsed() < window
        {
            return true;
        }
        *last = Some((text.to_owned(), Instant::now()));
        false
    }

    async fn run_turn(self, input: String, token: SessionToken, cancel: CancellationToken) {
        // No audio from a previous turn may keep playing.
        self.inner.sink.stop().await;

        self.schedule_status_enable(token);

        let mut turn = match self
            .inner
            .fetcher
            .fetch_response(&input, token, &cancel)
            .await
        {
            Ok(Some(turn)) => turn,
            // Aborted by a newer session: silent, the new turn owns the UI.
            Ok(None) => return,
            Err(e) => {
                self.fail_turn(token, &e);
                return;
            }
        };

        if !self.inner.guard.is_current(token) {
            return;
        }

        self.inner.status.disable();
        self.inner.state.update(|s| {
            s.loading = false;
            s.is_thinking = false;
            s.processing_status = None;
            s.function_results = turn.function_results.clone();
        });
        self.inner.state.emit(ChatEvent::Thinking { active: false });

        if let Some(warning) = turn.warning.as_deref() {
            self.trigger_summarization(warning);
        }

        if turn.segments.is_empty() {
            turn.complete = true;
            self.inner.state.emit(ChatEvent::TurnComplete);
            return;
        }

        match self.inner.preload.prime(&turn.segments, token).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            // Playback will announce and skip the failed first segment.
            Err(e) => warn!("{token}: first segment synthesis failed: {e}"),
        }

        let played_any = self.inner.sequencer.play_all(&turn, &self.inner.preload).await;

        if !self.inner.guard.is_current(token) {
            return;
        }

        if !played_any {
            self.fail_turn(
                token,
                &ChatError::Synthesis("no segment of the reply could be spoken".to_owned()),
            );
            return;
        }

        turn.complete = true;
        self.inner.state.update(|s| s.message = None);
        self.inner.state.emit(ChatEvent::TurnComplete);
        info!("{token}: turn complete");
    }

    /// Enable the status poller once the turn has been thinking for a
    /// moment; a fast response never flashes the indicator.
    fn schedule_status_enable(&self, token: SessionToken) {
        let delay = Duration::from_millis(self.inner.config.turn.status_enable_delay_ms);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Only while this turn's inference call is still outstanding.
            if this.inner.guard.is_current(token) && this.inner.state.snapshot().loading {
                this.inner.status.enable(token);
            }
        });
    }

    /// Out-of-band conversation summarization on a token-budget warning.
    /// Fire-and-forget; never blocks playback.
    fn trigger_summarization(&self, warning: &str) {
        info!("token-budget warning from backend: {warning}");
        let url = format!(
            "{}/chat/messages/resume/",
            self.inner.config.chat.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "user_id": self.inner.config.chat.user_id,
            "role_id": self.inner.config.chat.role_id,
        });
        let client = self.inner.client.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(r) if r.status().is_success() => debug!("summarization triggered"),
                Ok(r) => warn!("summarization trigger returned {}", r.status()),
                Err(e) => warn!("summarization trigger failed: {e}"),
            }
        });
    }

    /// Terminate the turn in a consistent idle state and tell the user.
    fn fail_turn(&self, token: SessionToken, e: &ChatError) {
        if !self.inner.guard.is_current(token) {
            return;
        }
        error!("{token}: turn failed: {e}");
        self.inner.status.disable();
        self.inner.state.settle();
        self.inner.state.emit(ChatEvent::Error {
            text: e.to_string(),
        });
    }
}

/// Forward audio-ended broadcasts into the playback completion signal.
fn spawn_audio_ended_listener(
    mut rx: broadcast::Receiver<AudioEnded>,
    signal: Arc<PlaybackSignal>,
) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(AudioEnded) => signal.signal(),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::error::Result;
    use crate::turn::messages::SpokenMessage;
    use async_trait::async_trait;

    struct NullSink;

    #[async_trait]
    impl AudioSink for NullSink {
        async fn play(&self, _message: &SpokenMessage) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) {}
    }

    #[tokio::test]
    async fn empty_input_warns_without_starting_a_turn() {
        let orchestrator =
            TurnOrchestrator::new(OrchestratorConfig::default(), Arc::new(NullSink));
        let mut events = orchestrator.subscribe();

        orchestrator.chat("   ");

        assert!(matches!(
            events.try_recv(),
            Ok(ChatEvent::Warning { .. })
        ));
        let snapshot = orchestrator.snapshot();
        assert!(!snapshot.loading);
        assert!(!snapshot.is_thinking);
    }

    #[tokio::test]
    async fn duplicate_tracker_drops_the_second_submission() {
        let orchestrator =
            TurnOrchestrator::new(OrchestratorConfig::default(), Arc::new(NullSink));
        assert!(!orchestrator.is_duplicate("hola"));
        assert!(orchestrator.is_duplicate("hola"));
        assert!(!orchestrator.is_duplicate("otra cosa"));
        // A different utterance resets the tracker.
        assert!(!orchestrator.is_duplicate("hola"));
    }
}
