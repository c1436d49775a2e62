//! Inference endpoint client: the single request/response call of a turn.

use crate::config::ChatEndpointConfig;
use crate::encoding::repair_mojibake;
use crate::error::{ChatError, Result};
use crate::session::{SessionGuard, SessionToken};
use crate::turn::messages::{Segment, Turn};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Issues the inference call for a turn and owns its cancellation.
pub struct ResponseFetcher {
    config: ChatEndpointConfig,
    client: reqwest::Client,
    guard: SessionGuard,
}

impl ResponseFetcher {
    #[must_use]
    pub fn new(config: ChatEndpointConfig, guard: SessionGuard) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            guard,
        }
    }

    /// Send one utterance to the inference endpoint.
    ///
    /// Returns `Ok(None)` when the call was aborted or superseded by a
    /// newer session; callers treat that as "do nothing", not an error.
    ///
    /// # Errors
    ///
    /// Returns an error for transport failures, non-2xx responses and
    /// malformed response bodies, but only while the turn is still current.
    pub async fn fetch_response(
        &self,
        input: &str,
        token: SessionToken,
        cancel: &CancellationToken,
    ) -> Result<Option<Turn>> {
        let url = format!("{}/chat/", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "user_input": input,
            "user_id": self.config.user_id,
            "role_id": self.config.role_id,
        });

        info!("fetching response for {token}");

        let sent = self.client.post(&url).json(&body).send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Ok(None),
            res = sent => res,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => return self.fail_if_current(token, format!("chat request failed: {e}")),
        };

        let status = response.status();
        if !status.is_success() {
            return self.fail_if_current(token, format!("chat endpoint returned {status}"));
        }

        let value: Value = tokio::select! {
            () = cancel.cancelled() => return Ok(None),
            res = response.json() => match res {
                Ok(v) => v,
                Err(e) => {
                    return self.fail_if_current(token, format!("chat response not JSON: {e}"));
                }
            },
        };

        if !self.guard.is_current(token) {
            return Ok(None);
        }

        let (segments, warning, function_results) = normalize_response(value)?;
        info!("{token}: {} reply segment(s)", segments.len());

        Ok(Some(Turn {
            input: input.to_owned(),
            token,
            segments,
            warning,
            function_results,
            complete: false,
        }))
    }

    fn fail_if_current(&self, token: SessionToken, message: String) -> Result<Option<Turn>> {
        if self.guard.is_current(token) {
            Err(ChatError::Chat(message))
        } else {
            // Superseded mid-flight; the failure belongs to a dead turn.
            Ok(None)
        }
    }
}

/// Normalize the response body to an ordered segment list.
///
/// The endpoint may answer with a bare segment object, a bare array, or a
/// wrapped `{response: ...}` object carrying `warning` and
/// `function_results` alongside. This is the only place that ambiguity is
/// handled; everything downstream sees one canonical shape.
fn normalize_response(value: Value) -> Result<(Vec<Segment>, Option<String>, Option<Value>)> {
    match value {
        Value::Object(mut map) if map.contains_key("response") => {
            let warning = map
                .get("warning")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            let function_results = map.remove("function_results").filter(|v| !v.is_null());
            let inner = map.remove("response").unwrap_or(Value::Null);
            Ok((normalize_segments(inner)?, warning, function_results))
        }
        other => Ok((normalize_segments(other)?, None, None)),
    }
}

fn normalize_segments(value: Value) -> Result<Vec<Segment>> {
    match value {
        Value::Array(items) => items.into_iter().map(normalize_segment).collect(),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![normalize_segment(other)?]),
    }
}

fn normalize_segment(value: Value) -> Result<Segment> {
    let mut segment = match value {
        Value::String(text) => Segment::from_text(text),
        other @ Value::Object(_) => serde_json::from_value(other)
            .map_err(|e| ChatError::Chat(format!("malformed reply segment: {e}")))?,
        other => {
            return Err(ChatError::Chat(format!(
                "unexpected reply segment shape: {other}"
            )));
        }
    };
    segment.text = repair_mojibake(&segment.text);
    Ok(segment)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_wrapped_array() {
        let (segments, warning, results) = normalize_response(json!({
            "response": [
                { "text": "Hola", "facialExpression": "smile" },
                { "text": "Adiós" }
            ],
            "warning": "token budget low",
            "function_results": { "lookup": 3 }
        }))
        .unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].facial_expression, "smile");
        assert_eq!(segments[1].animation, "Talking_1");
        assert_eq!(warning.as_deref(), Some("token budget low"));
        assert_eq!(results, Some(json!({ "lookup": 3 })));
    }

    #[test]
    fn normalizes_wrapped_single_object() {
        let (segments, warning, results) =
            normalize_response(json!({ "response": { "text": "Hola" } })).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Hola");
        assert!(warning.is_none());
        assert!(results.is_none());
    }

    #[test]
    fn normalizes_bare_array_and_bare_object() {
        let (segments, ..) = normalize_response(json!([{ "text": "uno" }, "dos"])).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].text, "dos");

        let (segments, ..) = normalize_response(json!({ "text": "solo" })).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn repairs_mojibake_in_segment_text() {
        let (segments, ..) =
            normalize_response(json!({ "response": [{ "text": "Â¿QuÃ© tal?" }] })).unwrap();
        assert_eq!(segments[0].text, "¿Qué tal?");
    }

    #[test]
    fn rejects_malformed_segments() {
        assert!(normalize_response(json!({ "response": [42] })).is_err());
        assert!(normalize_response(json!({ "response": [{ "animation": "x" }] })).is_err());
    }

    #[test]
    fn null_response_is_empty() {
        let (segments, ..) = normalize_response(json!({ "response": null })).unwrap();
        assert!(segments.is_empty());
    }
}
