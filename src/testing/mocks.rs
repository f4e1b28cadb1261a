//! Mock collaborators for testing.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{TokenRefresher, TokenStore};
use crate::engine::{Engine, RawRequest, RawResponse};
use crate::errors::RequestError;
use crate::feedback::FeedbackSink;

/// One scripted engine response.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    /// Simulated transport latency before the result is produced.
    pub delay: Duration,
    /// Status and body, or a transport error.
    pub result: Result<(StatusCode, Bytes), RequestError>,
}

impl ScriptedCall {
    /// A response with a status and body.
    #[must_use]
    pub fn respond(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok((status, body.into())),
        }
    }

    /// A transport-level error.
    #[must_use]
    pub fn error(err: RequestError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(err),
        }
    }

    /// Adds simulated latency.
    #[must_use]
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A mock engine that replays a script and records every request.
///
/// Scripted calls are consumed in order; once the script is empty the engine
/// falls back to its default response (200 with an empty body unless
/// configured otherwise).
pub struct MockEngine {
    script: Mutex<VecDeque<ScriptedCall>>,
    fallback: Mutex<ScriptedCall>,
    requests: Mutex<Vec<RawRequest>>,
}

impl MockEngine {
    /// Creates a mock engine answering 200 with an empty body.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ScriptedCall::respond(StatusCode::OK, Bytes::new())),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Creates a mock engine answering every call the same way.
    #[must_use]
    pub fn always(status: StatusCode, body: impl Into<Bytes>) -> Arc<Self> {
        let engine = Self::new();
        *engine.fallback.lock() = ScriptedCall::respond(status, body);
        engine
    }

    /// Sets the fallback used once the script runs dry.
    pub fn set_fallback(&self, call: ScriptedCall) {
        *self.fallback.lock() = call;
    }

    /// Appends a scripted call.
    pub fn push(&self, call: ScriptedCall) {
        self.script.lock().push_back(call);
    }

    /// Appends several scripted calls in order.
    pub fn push_all(&self, calls: impl IntoIterator<Item = ScriptedCall>) {
        self.script.lock().extend(calls);
    }

    /// The number of calls observed so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// The requests observed so far, in call order.
    #[must_use]
    pub fn recorded_requests(&self) -> Vec<RawRequest> {
        self.requests.lock().clone()
    }

    /// Clears recorded calls and any remaining script.
    pub fn reset(&self) {
        self.requests.lock().clear();
        self.script.lock().clear();
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn send_once(&self, request: RawRequest) -> Result<RawResponse, RequestError> {
        let call = {
            let mut script = self.script.lock();
            self.requests.lock().push(request);
            script.pop_front().unwrap_or_else(|| self.fallback.lock().clone())
        };

        if !call.delay.is_zero() {
            tokio::time::sleep(call.delay).await;
        }

        call.result.map(|(status, body)| RawResponse {
            status,
            headers: HeaderMap::new(),
            body,
        })
    }
}

/// A mock engine that routes responses by URL path.
///
/// Unlike [`MockEngine`]'s global script, routing keeps concurrent tests
/// deterministic: each path answers the same way no matter the arrival
/// order. Unrouted paths answer 200 with the path itself as the body.
pub struct RoutingEngine {
    routes: Mutex<std::collections::HashMap<String, ScriptedCall>>,
    calls: Mutex<Vec<String>>,
}

impl RoutingEngine {
    /// Creates a routing engine with no routes.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(std::collections::HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Sets the scripted call for a path.
    pub fn route(&self, path: &str, call: ScriptedCall) {
        self.routes.lock().insert(path.to_string(), call);
    }

    /// The paths observed so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// The number of calls observed so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Engine for RoutingEngine {
    async fn send_once(&self, request: RawRequest) -> Result<RawResponse, RequestError> {
        let path = request.url.path().to_string();
        self.calls.lock().push(path.clone());

        let call = self
            .routes
            .lock()
            .get(&path)
            .cloned()
            .unwrap_or_else(|| ScriptedCall::respond(StatusCode::OK, path));

        if !call.delay.is_zero() {
            tokio::time::sleep(call.delay).await;
        }

        call.result.map(|(status, body)| RawResponse {
            status,
            headers: HeaderMap::new(),
            body,
        })
    }
}

/// An in-memory token store.
#[derive(Debug, Default)]
pub struct StaticTokenStore {
    token: Mutex<Option<String>>,
}

impl StaticTokenStore {
    /// Creates a store seeded with a token.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(Some(token.into())),
        })
    }

    /// Creates an empty store.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The current token, read synchronously.
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.token.lock().clone()
    }
}

#[async_trait]
impl TokenStore for StaticTokenStore {
    async fn get(&self) -> Option<String> {
        self.token.lock().clone()
    }

    async fn set(&self, token: String) {
        *self.token.lock() = Some(token);
    }
}

/// A refresher that replays a scripted sequence of outcomes.
pub struct ScriptedRefresher {
    outcomes: Mutex<VecDeque<Result<String, RequestError>>>,
    delay: Duration,
    calls: Mutex<usize>,
}

impl ScriptedRefresher {
    /// A refresher that yields the given token once, then fails.
    #[must_use]
    pub fn succeeding(token: impl Into<String>) -> Arc<Self> {
        Self::with_outcomes([Ok(token.into())])
    }

    /// A refresher that always fails.
    #[must_use]
    pub fn failing() -> Arc<Self> {
        Self::with_outcomes([])
    }

    /// A refresher with an explicit outcome script.
    #[must_use]
    pub fn with_outcomes(
        outcomes: impl IntoIterator<Item = Result<String, RequestError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            delay: Duration::ZERO,
            calls: Mutex::new(0),
        })
    }

    /// A slow variant, for exercising refresh coalescing.
    #[must_use]
    pub fn slow(token: impl Into<String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::from([Ok(token.into())])),
            delay,
            calls: Mutex::new(0),
        })
    }

    /// How many times `refresh` was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl TokenRefresher for ScriptedRefresher {
    async fn refresh(&self) -> Result<String, RequestError> {
        *self.calls.lock() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.outcomes.lock().pop_front().unwrap_or_else(|| {
            Err(RequestError::AuthenticationFailed(
                "refresh script exhausted".to_string(),
            ))
        })
    }
}

/// A feedback sink that records everything it receives.
#[derive(Debug, Default)]
pub struct RecordingFeedbackSink {
    errors: Mutex<Vec<String>>,
    auth_failures: Mutex<usize>,
}

impl RecordingFeedbackSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The error messages received so far.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    /// How many terminal authentication failures were reported.
    #[must_use]
    pub fn auth_failure_count(&self) -> usize {
        *self.auth_failures.lock()
    }
}

impl FeedbackSink for RecordingFeedbackSink {
    fn on_error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }

    fn on_authentication_failed(&self) {
        *self.auth_failures.lock() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;

    fn raw_request() -> RawRequest {
        RawRequest {
            method: Method::GET,
            url: Url::parse("https://api.example/x").unwrap(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_mock_engine_script_then_fallback() {
        let engine = MockEngine::new();
        engine.push(ScriptedCall::respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "oops",
        ));

        let first = engine.send_once(raw_request()).await.unwrap();
        assert_eq!(first.status, StatusCode::INTERNAL_SERVER_ERROR);

        let second = engine.send_once(raw_request()).await.unwrap();
        assert_eq!(second.status, StatusCode::OK);

        assert_eq!(engine.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_engine_error_script() {
        let engine = MockEngine::new();
        engine.push(ScriptedCall::error(RequestError::NoNetwork));

        let err = engine.send_once(raw_request()).await.unwrap_err();
        assert_eq!(err, RequestError::NoNetwork);
    }

    #[tokio::test]
    async fn test_static_token_store_roundtrip() {
        let store = StaticTokenStore::with_token("t1");
        assert_eq!(store.get().await, Some("t1".to_string()));

        store.set("t2".to_string()).await;
        assert_eq!(store.current(), Some("t2".to_string()));
    }

    #[tokio::test]
    async fn test_scripted_refresher_exhaustion() {
        let refresher = ScriptedRefresher::succeeding("fresh");

        assert_eq!(refresher.refresh().await.unwrap(), "fresh");
        assert!(refresher.refresh().await.is_err());
        assert_eq!(refresher.call_count(), 2);
    }
}
