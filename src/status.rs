//! Independent processing-status polling loop.
//!
//! While the inference call for a turn is outstanding, the backend exposes
//! a human-readable processing phase ("Consultando documentos...") on a
//! separate endpoint. The poller runs its own fixed-delay loop against it,
//! gated by enable/disable and filtered by session token, so a stale phase
//! string can never surface after the turn that produced it is gone.

use crate::config::{ChatEndpointConfig, StatusConfig};
use crate::error::{ChatError, Result};
use crate::session::{SessionGuard, SessionToken};
use crate::state::SharedState;
use crate::turn::messages::ChatEvent;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: Option<String>,
}

/// Polls the status endpoint while enabled, reporting phases for exactly
/// one session.
pub struct StatusPoller {
    config: StatusConfig,
    endpoint: ChatEndpointConfig,
    client: reqwest::Client,
    guard: SessionGuard,
    state: SharedState,
    inner: Mutex<PollerInner>,
}

#[derive(Default)]
struct PollerInner {
    cancel: Option<CancellationToken>,
    disabled_at: Option<Instant>,
}

impl StatusPoller {
    #[must_use]
    pub fn new(
        config: StatusConfig,
        endpoint: ChatEndpointConfig,
        guard: SessionGuard,
        state: SharedState,
    ) -> Self {
        Self {
            config,
            endpoint,
            client: reqwest::Client::new(),
            guard,
            state,
            inner: Mutex::new(PollerInner::default()),
        }
    }

    /// Start polling for `token`. Any previous polling generation is
    /// cancelled first, so at most one loop is ever live.
    ///
    /// After a disable, results arriving within the re-enable cooldown are
    /// ignored: a poll issued under the old generation could otherwise
    /// land just after the new one starts and reinstate a stale phase.
    pub fn enable(&self, token: SessionToken) {
        let (cancel, ignore_until) = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if let Some(old) = inner.cancel.take() {
                old.cancel();
            }
            let cancel = CancellationToken::new();
            inner.cancel = Some(cancel.clone());
            let ignore_until = inner
                .disabled_at
                .map(|_| Instant::now() + Duration::from_millis(self.config.reenable_cooldown_ms));
            (cancel, ignore_until)
        };

        self.state.update(|s| s.polling_session = Some(token));
        info!("status polling enabled for {token}");

        let config = self.config.clone();
        let endpoint = self.endpoint.clone();
        let client = self.client.clone();
        let guard = self.guard.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            run_poll_loop(config, endpoint, client, guard, state, token, cancel, ignore_until)
                .await;
        });
    }

    /// Stop polling immediately. No further status updates are applied,
    /// including from a poll already in flight.
    pub fn disable(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(cancel) = inner.cancel.take() {
                cancel.cancel();
                inner.disabled_at = Some(Instant::now());
                debug!("status polling disabled");
            }
        }
        self.state.update(|s| s.polling_session = None);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_poll_loop(
    config: StatusConfig,
    endpoint: ChatEndpointConfig,
    client: reqwest::Client,
    guard: SessionGuard,
    state: SharedState,
    token: SessionToken,
    cancel: CancellationToken,
    ignore_until: Option<Instant>,
) {
    tokio::select! {
        () = cancel.cancelled() => return,
        () = tokio::time::sleep(Duration::from_millis(config.start_delay_ms)) => {}
    }

    loop {
        let polled = tokio::select! {
            () = cancel.cancelled() => return,
            res = poll_once(&config, &endpoint, &client) => res,
        };

        match polled {
            Ok(Some(phase)) => {
                let in_cooldown = ignore_until.is_some_and(|t| Instant::now() < t);
                // The result is tagged with the token the poll was issued
                // under; apply it only while that session is still current
                // and this generation is still live.
                if guard.is_current(token) && !cancel.is_cancelled() && !in_cooldown {
                    state.update(|s| s.processing_status = Some(phase.clone()));
                    state.emit(ChatEvent::ProcessingStatus { phase });
                }
            }
            Ok(None) => {}
            // Poll failures have no playback consequence; absorb them.
            Err(e) => debug!("status poll failed: {e}"),
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(Duration::from_millis(config.interval_ms)) => {}
        }
    }
}

async fn poll_once(
    config: &StatusConfig,
    endpoint: &ChatEndpointConfig,
    client: &reqwest::Client,
) -> Result<Option<String>> {
    let url = format!("{}/status/", endpoint.base_url.trim_end_matches('/'));
    // Cache-busting params are mandatory: some proxies cache GETs hard.
    let bust: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    let response = client
        .get(&url)
        .query(&[
            ("user_id", endpoint.user_id.as_str()),
            ("role_id", endpoint.role_id.as_str()),
            ("_t", &chrono::Utc::now().timestamp_millis().to_string()),
            ("_r", &bust),
        ])
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .send()
        .await
        .map_err(|e| ChatError::Status(format!("status request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ChatError::Status(format!(
            "status endpoint returned {status}"
        )));
    }

    let body: StatusBody = response
        .json()
        .await
        .map_err(|e| ChatError::Status(format!("status body not JSON: {e}")))?;
    Ok(body.status.filter(|s| !s.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn poller_for(server: &MockServer, guard: &SessionGuard, state: &SharedState) -> StatusPoller {
        let config = StatusConfig {
            start_delay_ms: 10,
            interval_ms: 40,
            request_timeout_ms: 1_000,
            reenable_cooldown_ms: 0,
        };
        let endpoint = ChatEndpointConfig {
            base_url: server.uri(),
            user_id: "u1".to_owned(),
            role_id: "r1".to_owned(),
        };
        StatusPoller::new(config, endpoint, guard.clone(), state.clone())
    }

    #[tokio::test]
    async fn applies_phase_for_current_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/"))
            .and(query_param("user_id", "u1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "Consultando documentos" })),
            )
            .mount(&server)
            .await;

        let guard = SessionGuard::new();
        let state = SharedState::new();
        let poller = poller_for(&server, &guard, &state);
        let token = guard.new_session();

        poller.enable(token);
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(
            state.snapshot().processing_status.as_deref(),
            Some("Consultando documentos")
        );
        assert_eq!(state.snapshot().polling_session, Some(token));
        poller.disable();
    }

    #[tokio::test]
    async fn stale_session_result_is_discarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "Pensando" })),
            )
            .mount(&server)
            .await;

        let guard = SessionGuard::new();
        let state = SharedState::new();
        let poller = poller_for(&server, &guard, &state);
        let token = guard.new_session();

        poller.enable(token);
        // A newer session makes every result from this generation stale.
        guard.new_session();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(state.snapshot().processing_status.is_none());
        poller.disable();
    }

    #[tokio::test]
    async fn disable_mid_flight_stops_updates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "Pensando" }))
                    .set_delay(Duration::from_millis(80)),
            )
            .mount(&server)
            .await;

        let guard = SessionGuard::new();
        let state = SharedState::new();
        let poller = poller_for(&server, &guard, &state);
        poller.enable(guard.new_session());

        // The first poll is in flight when we disable.
        tokio::time::sleep(Duration::from_millis(40)).await;
        poller.disable();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(state.snapshot().processing_status.is_none());
        assert!(state.snapshot().polling_session.is_none());
    }

    #[tokio::test]
    async fn reenable_cooldown_ignores_early_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "Pensando" })),
            )
            .mount(&server)
            .await;

        let guard = SessionGuard::new();
        let state = SharedState::new();
        let mut poller = poller_for(&server, &guard, &state);
        poller.config.reenable_cooldown_ms = 10_000;

        poller.enable(guard.new_session());
        poller.disable();
        poller.enable(guard.new_session());
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Every result lands inside the cooldown window and is ignored.
        assert!(state.snapshot().processing_status.is_none());
        poller.disable();
    }
}
