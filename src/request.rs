//! Request specifications.
//!
//! A [`RequestSpec`] is the immutable description of a single request:
//! method, URL parts, headers, structured query, optional body, and the
//! authentication binding stamped onto every attempt. Specs are built with
//! chained `with_*` methods and never mutated after submission; the pipeline
//! clones what it needs.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::errors::RequestError;

/// How authentication is applied to a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// No authentication header is stamped.
    #[default]
    None,
    /// `Authorization: Bearer <token>` from the client's token store.
    Bearer,
    /// The raw token under a custom header name.
    Header(HeaderName),
}

/// Immutable description of a single request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    base_url: String,
    path: String,
    headers: HeaderMap,
    query: BTreeMap<String, Value>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    auth: AuthScheme,
    idempotent_override: Option<bool>,
}

impl RequestSpec {
    /// Creates a new request spec.
    #[must_use]
    pub fn new(method: Method, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            base_url: base_url.into(),
            path: path.into(),
            headers: HeaderMap::new(),
            query: BTreeMap::new(),
            body: None,
            timeout: None,
            auth: AuthScheme::default(),
            idempotent_override: None,
        }
    }

    /// Creates a GET request spec.
    #[must_use]
    pub fn get(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Method::GET, base_url, path)
    }

    /// Creates a POST request spec.
    #[must_use]
    pub fn post(base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(Method::POST, base_url, path)
    }

    /// Adds a query parameter. Values may be scalars, lists, or nested maps.
    #[must_use]
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Adds a header. Later inserts for the same name replace earlier ones.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body as raw bytes.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes a value as the JSON request body.
    pub fn with_json_body<T: serde::Serialize>(mut self, value: &T) -> Result<Self, RequestError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| RequestError::Unknown(format!("body serialization failed: {e}")))?;
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Sets the per-request timeout, applied to each individual attempt.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the authentication binding.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    /// Overrides the method-derived idempotency classification.
    #[must_use]
    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent_override = Some(idempotent);
        self
    }

    /// The HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The declared headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The structured query map.
    #[must_use]
    pub fn query(&self) -> &BTreeMap<String, Value> {
        &self.query
    }

    /// The request body, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// The per-attempt timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The authentication binding.
    #[must_use]
    pub fn auth(&self) -> &AuthScheme {
        &self.auth
    }

    /// Whether this request is safe to retry.
    ///
    /// Defaults from the HTTP method (GET, HEAD, OPTIONS, TRACE, PUT and
    /// DELETE are idempotent; POST and PATCH are not), unless overridden.
    #[must_use]
    pub fn is_idempotent(&self) -> bool {
        if let Some(idempotent) = self.idempotent_override {
            return idempotent;
        }
        matches!(
            self.method.as_str(),
            "GET" | "HEAD" | "OPTIONS" | "TRACE" | "PUT" | "DELETE"
        )
    }

    /// Builds the absolute URL, including the query string.
    ///
    /// Query parameters are appended in sorted key order; scalar values are
    /// rendered plainly and lists/maps as compact JSON. The URL crate
    /// percent-encodes on the way out.
    pub fn materialize(&self) -> Result<Url, RequestError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| RequestError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        let mut url = base
            .join(&self.path)
            .map_err(|e| RequestError::InvalidUrl(format!("{}: {e}", self.path)))?;

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, &render_query_value(value));
            }
        }

        Ok(url)
    }
}

/// Renders a structured query value as its wire form.
///
/// Lists and maps are rendered as canonical JSON (sorted keys) so that the
/// materialized URL and the derived cache key always agree.
pub(crate) fn render_query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => crate::cache::key::canonical_json(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_idempotency_defaults() {
        assert!(RequestSpec::get("https://api.example", "/users").is_idempotent());
        assert!(RequestSpec::new(Method::PUT, "https://api.example", "/users/1").is_idempotent());
        assert!(RequestSpec::new(Method::DELETE, "https://api.example", "/users/1").is_idempotent());

        assert!(!RequestSpec::post("https://api.example", "/users").is_idempotent());
        assert!(!RequestSpec::new(Method::PATCH, "https://api.example", "/users/1").is_idempotent());
    }

    #[test]
    fn test_idempotency_override() {
        let spec = RequestSpec::post("https://api.example", "/idempotent-op")
            .with_idempotent(true);
        assert!(spec.is_idempotent());

        let spec = RequestSpec::get("https://api.example", "/mutating-get")
            .with_idempotent(false);
        assert!(!spec.is_idempotent());
    }

    #[test]
    fn test_materialize_joins_and_sorts_query() {
        let spec = RequestSpec::get("https://api.example", "/v1/users")
            .with_query_param("page", 1)
            .with_query_param("active", true);

        let url = spec.materialize().unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example/v1/users?active=true&page=1"
        );
    }

    #[test]
    fn test_materialize_structured_query_value() {
        let spec = RequestSpec::get("https://api.example", "/search")
            .with_query_param("filter", json!({"status": "open"}));

        let url = spec.materialize().unwrap();
        assert!(url.query().unwrap().contains("filter="));
    }

    #[test]
    fn test_materialize_invalid_base_url() {
        let spec = RequestSpec::get("not a url", "/path");
        let err = spec.materialize().unwrap_err();
        assert!(matches!(err, RequestError::InvalidUrl(_)));
    }

    #[test]
    fn test_json_body() {
        let spec = RequestSpec::post("https://api.example", "/orders")
            .with_json_body(&json!({"sku": "A-1"}))
            .unwrap();
        assert_eq!(spec.body().unwrap().as_ref(), br#"{"sku":"A-1"}"#);
    }

    #[test]
    fn test_header_replacement() {
        let spec = RequestSpec::get("https://api.example", "/")
            .with_header(http::header::ACCEPT, HeaderValue::from_static("text/plain"))
            .with_header(http::header::ACCEPT, HeaderValue::from_static("application/json"));

        assert_eq!(
            spec.headers().get(http::header::ACCEPT).unwrap(),
            "application/json"
        );
        assert_eq!(spec.headers().len(), 1);
    }
}
