//! Session tokens for turn invalidation.
//!
//! Every user utterance starts a new session. Asynchronous continuations
//! (network response handlers, timer callbacks, playback-end handlers)
//! capture the token that was current when they were scheduled and check it
//! again before mutating shared turn state or scheduling further work. This
//! is the single invalidation mechanism in the crate; there are no
//! per-subsystem cancellation flags to keep in sync.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, monotonically increasing session identifier. One per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Issues session tokens and answers staleness checks.
///
/// Cloning shares the underlying counter, so every component holding a
/// clone observes a new session immediately.
#[derive(Debug, Clone, Default)]
pub struct SessionGuard {
    current: Arc<AtomicU64>,
}

impl SessionGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session, invalidating every continuation captured under
    /// the previous token. Exactly one token is current at any time.
    pub fn new_session(&self) -> SessionToken {
        SessionToken(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Whether a previously captured token still matches the latest issued
    /// one.
    #[must_use]
    pub fn is_current(&self, token: SessionToken) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }

    /// The latest issued token.
    #[must_use]
    pub fn current(&self) -> SessionToken {
        SessionToken(self.current.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn tokens_are_monotonic() {
        let guard = SessionGuard::new();
        let a = guard.new_session();
        let b = guard.new_session();
        assert_ne!(a, b);
        assert_eq!(guard.current(), b);
    }

    #[test]
    fn old_token_goes_stale() {
        let guard = SessionGuard::new();
        let a = guard.new_session();
        assert!(guard.is_current(a));
        let b = guard.new_session();
        assert!(!guard.is_current(a));
        assert!(guard.is_current(b));
    }

    #[test]
    fn clones_share_the_counter() {
        let guard = SessionGuard::new();
        let other = guard.clone();
        let a = guard.new_session();
        assert!(other.is_current(a));
        other.new_session();
        assert!(!guard.is_current(a));
    }
}
