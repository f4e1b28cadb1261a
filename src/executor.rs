//! The per-request execution pipeline.
//!
//! [`TaskExecutor::execute`] drives one request end to end: consult the
//! control gate (which may suspend the caller or attach it to an equivalent
//! in-flight task), read the cache per policy, run the authenticated retry
//! loop against the transport engine, and write the result back per policy.
//! The in-flight dedup slot is released on every exit path via a drop guard
//! owned by the shared task itself.
//!
//! Cancellation is cooperative: every suspension point — gate waits, the
//! attach await, each engine call, backoff sleeps, the refresh await — is
//! wrapped in a select against the task's cancellation token, and dropping
//! the pending engine future abandons the transport attempt.

use bytes::Bytes;
use futures::FutureExt;
use http::header::{HeaderValue, AUTHORIZATION};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{RefreshCoordinator, TokenRefresher, TokenStore};
use crate::cache::{CacheKey, CacheStore};
use crate::cancellation::{CancellationToken, ReleaseGuard};
use crate::config::{CachePolicy, Lifecycle, TaskConfig};
use crate::engine::{Engine, RawRequest, RawResponse};
use crate::errors::RequestError;
use crate::feedback::{FeedbackSink, NoOpFeedbackSink};
use crate::gate::{ControlGate, GateOutcome, TaskHandle};
use crate::request::{AuthScheme, RequestSpec};

/// Executes requests through the gate/cache/retry pipeline.
///
/// Cheap to clone; all collaborators are shared. The executor itself owns no
/// mutable state.
#[derive(Clone)]
pub struct TaskExecutor {
    engine: Arc<dyn Engine>,
    cache: Arc<CacheStore>,
    gate: Arc<ControlGate>,
    coordinator: Arc<RefreshCoordinator>,
    token_store: Option<Arc<dyn TokenStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    feedback: Arc<dyn FeedbackSink>,
}

impl TaskExecutor {
    /// Creates an executor over the given collaborators.
    #[must_use]
    pub fn new(
        engine: Arc<dyn Engine>,
        cache: Arc<CacheStore>,
        gate: Arc<ControlGate>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            engine,
            cache,
            gate,
            coordinator,
            token_store: None,
            refresher: None,
            feedback: Arc::new(NoOpFeedbackSink),
        }
    }

    /// Attaches a token store used to stamp authentication on every attempt.
    #[must_use]
    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Attaches a refresher invoked (once per task) on unauthorized responses.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Attaches a feedback sink.
    #[must_use]
    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackSink>) -> Self {
        self.feedback = feedback;
        self
    }

    /// Executes a request to completion.
    pub async fn execute(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
    ) -> Result<Bytes, RequestError> {
        self.execute_scoped(spec, config, None).await
    }

    /// Executes a request under an ambient cancellation scope.
    ///
    /// How the scope applies depends on the task's lifecycle: `Manual` tasks
    /// follow it, `Persistent` tasks ignore it, and `BoundToOwner` tasks
    /// follow both the scope and their owner. The total timeout is a safety
    /// bound that fires regardless of lifecycle.
    pub async fn execute_scoped(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
        ambient: Option<&Arc<CancellationToken>>,
    ) -> Result<Bytes, RequestError> {
        let task_token = derive_task_token(&config, ambient);
        let task_id = Uuid::new_v4();
        debug!(%task_id, method = %spec.method(), path = spec.path(), "executing request");

        let pipeline = self.run_pipeline(spec, config.clone(), task_token.clone());

        match config.total_timeout {
            Some(total) => match tokio::time::timeout(total, pipeline).await {
                Ok(result) => result,
                Err(_) => {
                    task_token.cancel("total timeout elapsed");
                    Err(RequestError::Timeout)
                }
            },
            None => pipeline.await,
        }
    }

    async fn run_pipeline(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
        token: Arc<CancellationToken>,
    ) -> Result<Bytes, RequestError> {
        if token.is_cancelled() {
            return Err(cancellation_error(&token));
        }

        let key = CacheKey::for_spec(&spec)?;

        let reservation = match self.gate.pass(&key, &config.control, &token).await? {
            GateOutcome::Attach(handle) => {
                return tokio::select! {
                    result = handle => result,
                    () = token.cancelled() => Err(cancellation_error(&token)),
                };
            }
            GateOutcome::Proceed(reservation) => reservation,
        };

        match config.cache {
            CachePolicy::None => {}
            CachePolicy::CacheFirst { max_age } => {
                if let Some(bytes) = self.cache.read(&key, Some(max_age)) {
                    debug!(%key, "cache hit");
                    return Ok(bytes);
                }
            }
            CachePolicy::StaleWhileRevalidate => {
                if let Some(stale) = self.cache.read(&key, None) {
                    debug!(%key, "returning cached bytes, revalidating in background");
                    self.spawn_background_refresh(spec, config, key, reservation);
                    return Ok(stale);
                }
            }
        }

        match reservation {
            Some(slot) => {
                let shared = self.launch_shared_task(spec, config, key, token.clone(), slot);
                tokio::select! {
                    result = shared => result,
                    () = token.cancelled() => Err(cancellation_error(&token)),
                }
            }
            None => self.run_authenticated(spec, config, key, token).await,
        }
    }

    /// Builds the shared send-and-store task, installs it in the dedup
    /// registry, and spawns a driver so it reaches a terminal state even if
    /// every awaiter goes away.
    fn launch_shared_task(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
        key: CacheKey,
        token: Arc<CancellationToken>,
        slot: ReleaseGuard,
    ) -> TaskHandle {
        let this = self.clone();
        let work_key = key.clone();
        let work = async move {
            // The reservation lives inside the shared task: the slot is
            // released exactly when the task reaches a terminal state.
            let _slot = slot;
            this.run_authenticated(spec, config, work_key, token).await
        };

        let shared: TaskHandle = work.boxed().shared();
        self.gate.update_in_flight(&key, shared.clone());

        let driver = shared.clone();
        tokio::spawn(async move {
            let _ = driver.await;
        });

        shared
    }

    /// Spawns the stale-while-revalidate background refresh.
    ///
    /// The refresh runs detached from the caller's cancellation scope;
    /// failures are logged, never raised.
    fn spawn_background_refresh(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
        key: CacheKey,
        reservation: Option<ReleaseGuard>,
    ) {
        let refresh_token = CancellationToken::new();

        match reservation {
            Some(slot) => {
                // Keep the dedup slot occupied by the refresh so concurrent
                // equivalent requests attach to it.
                let shared =
                    self.launch_shared_task(spec, config, key.clone(), refresh_token, slot);
                tokio::spawn(async move {
                    if let Err(err) = shared.await {
                        warn!(%key, error = %err, "background revalidation failed");
                    }
                });
            }
            None => {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(err) = this
                        .run_authenticated(spec, config, key.clone(), refresh_token)
                        .await
                    {
                        warn!(%key, error = %err, "background revalidation failed");
                    }
                });
            }
        }
    }

    /// Runs the retry loop and writes the result back per cache policy.
    async fn run_authenticated(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
        key: CacheKey,
        token: Arc<CancellationToken>,
    ) -> Result<Bytes, RequestError> {
        let bytes = self.run_attempts(&spec, &config, &token).await?;

        match config.cache {
            CachePolicy::None => {}
            CachePolicy::CacheFirst { max_age } => {
                self.cache.write(key, bytes.clone(), Some(max_age));
            }
            CachePolicy::StaleWhileRevalidate => {
                self.cache.write(key, bytes.clone(), None);
            }
        }

        Ok(bytes)
    }

    /// The retry engine: authenticated attempts with classification,
    /// single-shot token refresh, and policy-driven backoff.
    async fn run_attempts(
        &self,
        spec: &RequestSpec,
        config: &TaskConfig,
        token: &Arc<CancellationToken>,
    ) -> Result<Bytes, RequestError> {
        let attempt_timeout = config.timeout.or(spec.timeout());
        let mut attempt: u32 = 0;
        let mut refreshed = false;

        loop {
            if token.is_cancelled() {
                return Err(cancellation_error(token));
            }

            // Auth is re-applied on every attempt so a refreshed token takes
            // effect on the next send.
            let raw = self.build_raw_request(spec).await?;

            let sent = tokio::select! {
                result = self.send_with_deadline(raw, attempt_timeout) => result,
                () = token.cancelled() => return Err(cancellation_error(token)),
            };

            let error = match sent {
                Ok(response) => match classify(response) {
                    Ok(bytes) => return Ok(bytes),
                    Err(error) => error,
                },
                Err(error) => error,
            };

            if error.is_cancelled() {
                return Err(error);
            }

            if error.is_unauthorized() {
                let Some(refresher) = self.refresher.clone() else {
                    self.feedback.on_authentication_failed();
                    return Err(RequestError::AuthenticationFailed(
                        "unauthorized response and no refresher configured".to_string(),
                    ));
                };

                if refreshed {
                    return Err(error);
                }

                let refresh = tokio::select! {
                    result = self.coordinator.refresh(refresher) => result,
                    () = token.cancelled() => return Err(cancellation_error(token)),
                };

                match refresh {
                    Ok(new_token) => {
                        if let Some(store) = &self.token_store {
                            store.set(new_token).await;
                        }
                        refreshed = true;
                        // The post-refresh attempt is counted against the
                        // budget so an always-401 server cannot loop forever.
                        attempt += 1;
                        if attempt >= config.retry.max_attempts() {
                            return Err(RequestError::retry_exhausted(error));
                        }
                        continue;
                    }
                    Err(refresh_err) if refresh_err.is_cancelled() => return Err(refresh_err),
                    Err(refresh_err) => {
                        self.feedback.on_authentication_failed();
                        return Err(RequestError::AuthenticationFailed(refresh_err.to_string()));
                    }
                }
            }

            if !error.is_retry_eligible() || !spec.is_idempotent() || !config.retry.allows_retry()
            {
                return Err(error);
            }
            if !config.retry.can_retry(attempt) {
                return Err(RequestError::retry_exhausted(error));
            }

            let delay = config.jitter.apply(config.retry.delay_for(attempt));
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after backoff"
            );
            if !delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = token.cancelled() => return Err(cancellation_error(token)),
                }
            }

            attempt += 1;
        }
    }

    async fn build_raw_request(&self, spec: &RequestSpec) -> Result<RawRequest, RequestError> {
        let url = spec.materialize()?;
        let mut headers = spec.headers().clone();

        match spec.auth() {
            AuthScheme::None => {}
            AuthScheme::Bearer => {
                if let Some(token) = self.current_token().await {
                    let value = HeaderValue::from_str(&format!("Bearer {token}"))
                        .map_err(|e| RequestError::Unknown(e.to_string()))?;
                    headers.insert(AUTHORIZATION, value);
                }
            }
            AuthScheme::Header(name) => {
                if let Some(token) = self.current_token().await {
                    let value = HeaderValue::from_str(&token)
                        .map_err(|e| RequestError::Unknown(e.to_string()))?;
                    headers.insert(name.clone(), value);
                }
            }
        }

        Ok(RawRequest {
            method: spec.method().clone(),
            url,
            headers,
            body: spec.body().cloned(),
        })
    }

    async fn current_token(&self) -> Option<String> {
        match &self.token_store {
            Some(store) => store.get().await,
            None => None,
        }
    }

    async fn send_with_deadline(
        &self,
        raw: RawRequest,
        deadline: Option<Duration>,
    ) -> Result<RawResponse, RequestError> {
        match deadline {
            Some(limit) => match tokio::time::timeout(limit, self.engine.send_once(raw)).await {
                Ok(result) => result,
                Err(_) => Err(RequestError::Timeout),
            },
            None => self.engine.send_once(raw).await,
        }
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("has_token_store", &self.token_store.is_some())
            .field("has_refresher", &self.refresher.is_some())
            .finish()
    }
}

/// Classifies a transport response into bytes or an error.
fn classify(response: RawResponse) -> Result<Bytes, RequestError> {
    if response.is_success() {
        return Ok(response.body);
    }

    let message = if response.body.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&response.body).into_owned())
    };

    Err(RequestError::server(response.status.as_u16(), message))
}

/// Derives the task's cancellation token from its lifecycle and scope.
fn derive_task_token(
    config: &TaskConfig,
    ambient: Option<&Arc<CancellationToken>>,
) -> Arc<CancellationToken> {
    match &config.lifecycle {
        Lifecycle::Persistent => CancellationToken::new(),
        Lifecycle::BoundToOwner(binding) => {
            let token = binding.token().child();
            if let Some(ambient) = ambient {
                let linked = token.clone();
                ambient.on_cancel(move |reason| linked.cancel(reason));
            }
            token
        }
        Lifecycle::Manual => match ambient {
            Some(ambient) => ambient.child(),
            None => CancellationToken::new(),
        },
    }
}

fn cancellation_error(token: &Arc<CancellationToken>) -> RequestError {
    RequestError::cancelled(token.reason().unwrap_or_else(|| "cancelled".to_string()))
}
