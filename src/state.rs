//! Observable orchestrator state shared with the UI.
//!
//! UIs can either poll [`SharedState::snapshot`] or subscribe to the
//! [`ChatEvent`] broadcast for push-style updates; both views are kept in
//! step by the orchestration stages.

use crate::session::SessionToken;
use crate::turn::messages::{ChatEvent, SpokenMessage};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const EVENT_CHANNEL_SIZE: usize = 64;

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    /// Whether the inference call for the current turn is outstanding.
    pub loading: bool,
    /// Whether the "thinking" indicator should show.
    pub is_thinking: bool,
    /// Latest processing phase reported by the status poller.
    pub processing_status: Option<String>,
    /// Session the status poller is currently serving, if enabled.
    pub polling_session: Option<SessionToken>,
    /// Payload of the segment currently playing.
    pub message: Option<SpokenMessage>,
    /// Ordered history of shown segment texts for the current turn.
    pub display_responses: Vec<String>,
    /// Function-call results passed through from the inference endpoint.
    pub function_results: Option<serde_json::Value>,
}

/// Handle to the mutable snapshot plus the event broadcast.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<ChatSnapshot>>,
    events: broadcast::Sender<ChatEvent>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Mutex::new(ChatSnapshot::default())),
            events,
        }
    }

    /// Clone of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Subscribe to state-change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Best-effort event emission; never blocks the orchestration path.
    pub(crate) fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut ChatSnapshot)) {
        if let Ok(mut snapshot) = self.inner.lock() {
            f(&mut snapshot);
        }
    }

    /// Reset everything the previous turn owned. Called under a fresh
    /// session token, before any of the new turn's async work starts.
    pub(crate) fn begin_turn(&self) {
        self.update(|s| {
            s.loading = true;
            s.is_thinking = true;
            s.processing_status = None;
            s.message = None;
            s.display_responses.clear();
            s.function_results = None;
        });
        self.emit(ChatEvent::Thinking { active: true });
    }

    /// Leave the idle state a failed or finished turn must end in: nothing
    /// loading, nothing thinking, no status phase.
    pub(crate) fn settle(&self) {
        self.update(|s| {
            s.loading = false;
            s.is_thinking = false;
            s.processing_status = None;
        });
    }
}
