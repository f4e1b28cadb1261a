//! The network client: per-instance wiring of the pipeline.
//!
//! A [`NetworkClient`] owns its cache, gate, and refresh coordinator — there
//! is no process-wide singleton. Two clients never share shaping state or
//! cached responses unless the embedding application shares the client.

use bytes::Bytes;
use std::sync::Arc;

use crate::auth::{RefreshCoordinator, TokenRefresher, TokenStore};
use crate::cache::{CacheKey, CacheStore};
use crate::cancellation::CancellationToken;
use crate::config::TaskConfig;
use crate::engine::Engine;
use crate::errors::{OrchestrationError, RequestError};
use crate::executor::TaskExecutor;
use crate::feedback::FeedbackSink;
use crate::gate::ControlGate;
use crate::orchestrator::{
    CancellationStrategy, FailureStrategy, OrchestrationPlan, Orchestrator,
};
use crate::request::RequestSpec;

/// Builder for [`NetworkClient`].
pub struct NetworkClientBuilder {
    engine: Arc<dyn Engine>,
    token_store: Option<Arc<dyn TokenStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    feedback: Option<Arc<dyn FeedbackSink>>,
}

impl NetworkClientBuilder {
    /// Attaches the token store used to stamp authentication.
    #[must_use]
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Attaches the refresher invoked on unauthorized responses.
    #[must_use]
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Attaches a feedback sink for higher layers.
    #[must_use]
    pub fn feedback(mut self, feedback: Arc<dyn FeedbackSink>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Builds the client.
    #[must_use]
    pub fn build(self) -> NetworkClient {
        let cache = Arc::new(CacheStore::new());
        let gate = Arc::new(ControlGate::new());
        let coordinator = Arc::new(RefreshCoordinator::new());

        let mut executor = TaskExecutor::new(
            self.engine,
            cache.clone(),
            gate.clone(),
            coordinator.clone(),
        );
        if let Some(store) = self.token_store {
            executor = executor.with_token_store(store);
        }
        if let Some(refresher) = self.refresher {
            executor = executor.with_refresher(refresher);
        }
        if let Some(feedback) = self.feedback {
            executor = executor.with_feedback(feedback);
        }

        NetworkClient {
            orchestrator: Orchestrator::new(executor.clone()),
            executor,
            cache,
            gate,
        }
    }
}

/// A policy-driven request client.
#[derive(Clone)]
pub struct NetworkClient {
    executor: TaskExecutor,
    orchestrator: Orchestrator,
    cache: Arc<CacheStore>,
    gate: Arc<ControlGate>,
}

impl NetworkClient {
    /// Starts building a client over a transport engine.
    #[must_use]
    pub fn builder(engine: Arc<dyn Engine>) -> NetworkClientBuilder {
        NetworkClientBuilder {
            engine,
            token_store: None,
            refresher: None,
            feedback: None,
        }
    }

    /// Executes a single request.
    pub async fn execute(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
    ) -> Result<Bytes, RequestError> {
        self.executor.execute(spec, config).await
    }

    /// Executes a single request under an ambient cancellation scope.
    pub async fn execute_scoped(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
        ambient: &Arc<CancellationToken>,
    ) -> Result<Bytes, RequestError> {
        self.executor.execute_scoped(spec, config, Some(ambient)).await
    }

    /// Executes a single request and decodes the response as JSON.
    pub async fn execute_json<T: serde::de::DeserializeOwned>(
        &self,
        spec: RequestSpec,
        config: TaskConfig,
    ) -> Result<T, RequestError> {
        let bytes = self.executor.execute(spec, config).await?;
        serde_json::from_slice(&bytes).map_err(|e| RequestError::DecodingFailed(e.to_string()))
    }

    /// Runs a request DAG.
    pub async fn orchestrate<T>(
        &self,
        plan: OrchestrationPlan<T>,
        strategy: FailureStrategy,
    ) -> Result<T, OrchestrationError> {
        self.orchestrator.orchestrate(plan, strategy).await
    }

    /// Runs a request DAG with explicit cancellation semantics and scope.
    pub async fn orchestrate_scoped<T>(
        &self,
        plan: OrchestrationPlan<T>,
        strategy: FailureStrategy,
        cancellation: CancellationStrategy,
        ambient: Option<&Arc<CancellationToken>>,
    ) -> Result<T, OrchestrationError> {
        self.orchestrator
            .orchestrate_scoped(plan, strategy, cancellation, ambient)
            .await
    }

    /// Derives the cache key a request spec maps to.
    pub fn cache_key(&self, spec: &RequestSpec) -> Result<CacheKey, RequestError> {
        CacheKey::for_spec(spec)
    }

    /// Drops the cached response for a key.
    pub fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key);
    }

    /// Drops every cached response.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Sweeps entries that outlived their TTL.
    pub fn cleanup_expired(&self) {
        self.cache.cleanup_expired();
    }

    /// The number of requests currently registered for deduplication.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.gate.in_flight_count()
    }
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("cached_entries", &self.cache.len())
            .field("in_flight", &self.gate.in_flight_count())
            .finish()
    }
}
