//! # Reqflow
//!
//! A policy-driven client-side request engine.
//!
//! Reqflow turns declared request specifications into completed responses
//! while enforcing:
//!
//! - **Deduplication**: equivalent concurrent requests share one in-flight task
//! - **Debounce/throttle gating**: per-key shaping of request initiation
//! - **Caching**: cache-first and stale-while-revalidate policies over an
//!   in-memory TTL store
//! - **Retry with token refresh**: policy-driven backoff with single-flight
//!   credential refresh under concurrent 401s
//! - **Cancellation propagation**: cooperative tokens reaching every
//!   suspension point, down to the transport
//! - **DAG orchestration**: topological layered execution with fail-fast or
//!   continue-on-error semantics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reqflow::prelude::*;
//!
//! let client = NetworkClient::builder(engine)
//!     .token_store(store)
//!     .refresher(refresher)
//!     .build();
//!
//! let spec = RequestSpec::get("https://api.example", "/v1/users")
//!     .with_query_param("page", 1)
//!     .with_auth(AuthScheme::Bearer);
//!
//! let config = TaskConfig::new()
//!     .with_control(ControlPolicy::new().deduplicated())
//!     .with_cache(CachePolicy::CacheFirst { max_age: Duration::from_secs(60) })
//!     .with_retry(RetryPolicy::exponential(4, Duration::from_secs(1), 2.0, Duration::from_secs(30)));
//!
//! let bytes = client.execute(spec, config).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod auth;
pub mod cache;
pub mod cancellation;
pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod feedback;
pub mod gate;
pub mod orchestrator;
pub mod request;
pub mod retry;
pub mod testing;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{RefreshCoordinator, TokenRefresher, TokenStore};
    pub use crate::cache::{CacheKey, CacheStore};
    pub use crate::cancellation::{CancellationToken, OwnerBinding, OwnerHandle};
    pub use crate::client::{NetworkClient, NetworkClientBuilder};
    pub use crate::config::{CachePolicy, ControlPolicy, Lifecycle, Priority, TaskConfig};
    pub use crate::engine::{Engine, RawRequest, RawResponse};
    pub use crate::errors::{OrchestrationError, RequestError};
    pub use crate::executor::TaskExecutor;
    pub use crate::feedback::{FeedbackSink, LoggingFeedbackSink, NoOpFeedbackSink};
    pub use crate::gate::{ControlGate, GateOutcome};
    pub use crate::orchestrator::{
        CancellationStrategy, FailureStrategy, OrchestrationPlan, Orchestrator, RequestNode,
        ResultsMap,
    };
    pub use crate::request::{AuthScheme, RequestSpec};
    pub use crate::retry::{JitterStrategy, RetryPolicy};
}
