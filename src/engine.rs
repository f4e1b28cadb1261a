//! Transport capability consumed by the core.
//!
//! The core never talks HTTP itself; it hands a fully materialized
//! [`RawRequest`] to an [`Engine`] and classifies the [`RawResponse`].
//! Implementations wrap a concrete client (and its connection pool) and are
//! expected to be cancellation-safe: dropping the pending `send_once` future
//! must abandon the underlying transport work.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

use crate::errors::RequestError;

/// A fully materialized request, ready for the wire.
#[derive(Debug, Clone)]
pub struct RawRequest {
    /// The HTTP method.
    pub method: Method,
    /// The absolute URL, query string included.
    pub url: Url,
    /// All headers, auth already stamped.
    pub headers: HeaderMap,
    /// The body, if any.
    pub body: Option<Bytes>,
}

/// A transport-level response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// The response body.
    pub body: Bytes,
}

impl RawResponse {
    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// The transport capability.
///
/// One call is one attempt: no retries, no caching, no auth handling —
/// those belong to the pipeline. Implementations map connectivity failures
/// to [`RequestError::NoNetwork`] and anything else uncategorizable to
/// [`RequestError::Unknown`]; non-2xx statuses are returned as responses,
/// not errors, so the retry engine can classify them.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Performs a single send over the transport.
    async fn send_once(&self, request: RawRequest) -> Result<RawResponse, RequestError>;
}
