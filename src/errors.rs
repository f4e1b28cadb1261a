//! Error types for the request engine.
//!
//! Two taxonomies: [`RequestError`] for everything a single request pipeline
//! can raise, and [`OrchestrationError`] for plan-level failures. Request
//! errors stay `Clone` on purpose — deduplicated callers attached to a shared
//! in-flight task all observe the same terminal error.

use std::collections::HashMap;
use thiserror::Error;

/// The error type for single-request execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Cancellation was observed at a suspension point.
    #[error("request cancelled: {reason}")]
    Cancelled {
        /// Why the request was cancelled.
        reason: String,
    },

    /// A per-attempt or total deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// The transport reported missing connectivity.
    #[error("no network connectivity")]
    NoNetwork,

    /// The server answered with a non-2xx status.
    #[error("server returned {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Server {
        /// HTTP status code.
        status: u16,
        /// Optional response message.
        message: Option<String>,
    },

    /// A higher layer failed to deserialize the response bytes.
    #[error("decoding failed: {0}")]
    DecodingFailed(String),

    /// Token refresh failed, or a 401 arrived with no refresher configured.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Retry attempts reached the policy's maximum.
    #[error("retries exhausted, last error: {last}")]
    RetryExhausted {
        /// The error observed on the final attempt.
        last: Box<RequestError>,
    },

    /// The request spec produced an unparseable URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Uncategorized transport error.
    #[error("transport error: {0}")]
    Unknown(String),
}

impl RequestError {
    /// Creates a cancellation error with a reason.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates a server error from a status code.
    #[must_use]
    pub fn server(status: u16, message: Option<String>) -> Self {
        Self::Server { status, message }
    }

    /// Wraps an error as the terminal result of an exhausted retry loop.
    #[must_use]
    pub fn retry_exhausted(last: RequestError) -> Self {
        Self::RetryExhausted {
            last: Box::new(last),
        }
    }

    /// Returns true if this is an HTTP 401 server error.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Server { status: 401, .. })
    }

    /// Returns true if this is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if the retry engine may recover from this error.
    ///
    /// Only 5xx responses, timeouts, and missing connectivity are
    /// retry-eligible; everything else bubbles up unchanged. Whether a
    /// retry actually happens is further gated by idempotency and policy.
    #[must_use]
    pub fn is_retry_eligible(&self) -> bool {
        match self {
            Self::Timeout | Self::NoNetwork => true,
            Self::Server { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// The error type for DAG orchestration.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    /// Two nodes in the plan share the same id.
    #[error("duplicate node id '{0}' in plan")]
    DuplicateNode(String),

    /// A node declares a dependency on an id not present in the plan.
    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency {
        /// The declaring node.
        node: String,
        /// The missing dependency id.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency among nodes: {}", .ids.join(", "))]
    CyclicDependency {
        /// Nodes that could never become runnable.
        ids: Vec<String>,
    },

    /// A node failed under the fail-fast strategy.
    #[error("node '{id}' failed: {source}")]
    NodeFailed {
        /// The failing node's id.
        id: String,
        /// The underlying request error.
        source: RequestError,
    },

    /// Every runnable node in a layer failed under continue-on-error.
    #[error("all {} runnable nodes in a layer failed: {}", .failures.len(), sorted_ids(.failures))]
    AllNodesFailed {
        /// Per-node terminal errors.
        failures: HashMap<String, RequestError>,
    },

    /// The plan's transform could not extract a typed result.
    #[error("result extraction failed: {0}")]
    ResultExtraction(String),

    /// The orchestration was cancelled.
    #[error("orchestration cancelled: {reason}")]
    Cancelled {
        /// Why the orchestration was cancelled.
        reason: String,
    },
}

fn sorted_ids(failures: &HashMap<String, RequestError>) -> String {
    let mut ids: Vec<&str> = failures.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids.join(", ")
}

impl OrchestrationError {
    /// Attaches a node id to a bubbling request error.
    #[must_use]
    pub fn node_failed(id: impl Into<String>, source: RequestError) -> Self {
        Self::NodeFailed {
            id: id.into(),
            source,
        }
    }

    /// Returns the failing node id, if this error names one.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { id, .. } => Some(id),
            _ => None,
        }
    }
}
