//! Background pre-synthesis of reply segments.
//!
//! Segment 0 is synthesized with top priority, blocking the first
//! audio-ready signal, because the user must hear a reply as soon as
//! possible. The remaining segments are synthesized in order by a
//! background task that runs concurrently with playback, each prefixed
//! with a short transitional filler phrase so multi-segment speech flows
//! naturally. Completed audio lands in a per-turn cache keyed by origin
//! index; playback pulls from the cache when it needs a segment and
//! synthesizes on demand when the background loop has not got there yet.
//! Either way a segment is synthesized at most once per turn.

use crate::error::{ChatError, Result};
use crate::session::{SessionGuard, SessionToken};
use crate::tts::SpeechSynthesizer;
use crate::turn::messages::{Segment, SynthState};
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Drives per-segment synthesis and owns the preload cache.
#[derive(Clone)]
pub struct PreloadScheduler {
    synth: Arc<SpeechSynthesizer>,
    guard: SessionGuard,
    fillers: Arc<Vec<String>>,
    inner: Arc<Mutex<CacheInner>>,
    changed: Arc<Notify>,
}

/// Cache state owned exclusively by the turn named in `token`.
struct CacheInner {
    token: Option<SessionToken>,
    states: Vec<SynthState>,
    audio: HashMap<usize, Bytes>,
}

enum Slot {
    /// Audio is cached.
    Ready(Bytes),
    /// Synthesis failed earlier; the segment should be skipped.
    Failed,
    /// This caller claimed the slot and must synthesize it.
    Claimed,
    /// Another call is synthesizing the slot; wait for it.
    InFlight,
    /// The cache belongs to a different turn.
    Stale,
}

impl PreloadScheduler {
    #[must_use]
    pub fn new(synth: Arc<SpeechSynthesizer>, guard: SessionGuard, fillers: Vec<String>) -> Self {
        Self {
            synth,
            guard,
            fillers: Arc::new(fillers),
            inner: Arc::new(Mutex::new(CacheInner {
                token: None,
                states: Vec::new(),
                audio: HashMap::new(),
            })),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Start pre-synthesis for a new turn.
    ///
    /// Claims segment 0, spawns the background loop for segments 1..N, then
    /// synthesizes segment 0 inline, so the priority call is issued before
    /// any background call, and this method returns only once the first
    /// segment's audio is ready.
    ///
    /// Returns `Ok(None)` when the turn was superseded mid-synthesis.
    ///
    /// # Errors
    ///
    /// Returns an error if segment 0 fails to synthesize; later segments
    /// are unaffected and playback will skip the failed one.
    pub async fn prime(&self, segments: &[Segment], token: SessionToken) -> Result<Option<Bytes>> {
        self.reset(segments.len(), token);
        let Some(first) = segments.first() else {
            return Ok(None);
        };

        // Claim slot 0 before the background task exists so its requests
        // always trail the priority request.
        self.try_claim(0, token);
        self.spawn_background(segments[1..].to_vec(), token);
        self.synthesize_claimed(first, 0, token).await
    }

    /// Audio for one segment: from the cache, or synthesized on demand
    /// under the same once-per-segment guard the background loop uses.
    ///
    /// Returns `Ok(None)` when the turn is no longer current.
    ///
    /// # Errors
    ///
    /// Returns an error when synthesis for this segment failed; the caller
    /// advances past the segment rather than aborting the turn.
    pub async fn fetch(
        &self,
        segment: &Segment,
        index: usize,
        token: SessionToken,
    ) -> Result<Option<Bytes>> {
        loop {
            if !self.guard.is_current(token) {
                return Ok(None);
            }

            // Register interest before inspecting state so a completion
            // between the check and the await cannot be missed.
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match self.slot(index, token) {
                Slot::Ready(audio) => return Ok(Some(audio)),
                Slot::Failed => {
                    return Err(ChatError::Synthesis(format!(
                        "segment {index} failed to synthesize"
                    )));
                }
                Slot::Stale => return Ok(None),
                Slot::Claimed => return self.synthesize_claimed(segment, index, token).await,
                Slot::InFlight => changed.await,
            }
        }
    }

    fn reset(&self, segment_count: usize, token: SessionToken) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.token = Some(token);
            inner.states = vec![SynthState::Pending; segment_count];
            inner.audio.clear();
        }
        self.changed.notify_waiters();
    }

    /// Inspect a slot, claiming it when it is still `Pending`.
    fn slot(&self, index: usize, token: SessionToken) -> Slot {
        let Ok(mut inner) = self.inner.lock() else {
            return Slot::Stale;
        };
        if inner.token != Some(token) {
            return Slot::Stale;
        }
        match inner.states.get(index).copied() {
            Some(SynthState::Loaded) => inner
                .audio
                .get(&index)
                .cloned()
                .map_or(Slot::Failed, Slot::Ready),
            Some(SynthState::Error) => Slot::Failed,
            Some(SynthState::Loading) => Slot::InFlight,
            Some(SynthState::Pending) => {
                inner.states[index] = SynthState::Loading;
                Slot::Claimed
            }
            None => Slot::Failed,
        }
    }

    fn try_claim(&self, index: usize, token: SessionToken) -> bool {
        matches!(self.slot(index, token), Slot::Claimed)
    }

    fn finish(&self, index: usize, token: SessionToken, audio: Option<Bytes>) {
        if let Ok(mut inner) = self.inner.lock()
            && inner.token == Some(token)
            && inner.states.get(index).copied() == Some(SynthState::Loading)
        {
            match audio {
                Some(audio) => {
                    inner.states[index] = SynthState::Loaded;
                    inner.audio.insert(index, audio);
                }
                None => inner.states[index] = SynthState::Error,
            }
        }
        self.changed.notify_waiters();
    }

    /// Synthesize a slot this caller has claimed, then publish the result.
    async fn synthesize_claimed(
        &self,
        segment: &Segment,
        index: usize,
        token: SessionToken,
    ) -> Result<Option<Bytes>> {
        let text = if index == 0 {
            segment.text.clone()
        } else {
            self.with_filler(&segment.text)
        };

        match self
            .synth
            .synthesize(&text, segment.tts_prompt.as_deref(), token)
            .await
        {
            Ok(Some(audio)) => {
                self.finish(index, token, Some(audio.clone()));
                Ok(Some(audio))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.finish(index, token, None);
                Err(e)
            }
        }
    }

    /// Synthesize segments 1..N in order, in the background.
    fn spawn_background(&self, rest: Vec<Segment>, token: SessionToken) {
        if rest.is_empty() {
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            for (offset, segment) in rest.iter().enumerate() {
                let index = offset + 1;
                if !scheduler.guard.is_current(token) {
                    return;
                }
                if !scheduler.try_claim(index, token) {
                    // Already loading, loaded, or claimed on demand.
                    continue;
                }
                match scheduler.synthesize_claimed(segment, index, token).await {
                    Ok(Some(_)) => info!("{token}: preloaded segment {index}"),
                    Ok(None) => return,
                    Err(e) => warn!("{token}: preload of segment {index} failed: {e}"),
                }
            }
        });
    }

    fn with_filler(&self, text: &str) -> String {
        match self.fillers.choose(&mut rand::thread_rng()) {
            Some(filler) => format!("{filler}{text}"),
            None => text.to_owned(),
        }
    }
}
