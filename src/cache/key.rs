//! Canonical request fingerprints.
//!
//! A [`CacheKey`] is a deterministic digest of `(method, URL, query, body)`
//! shared by the cache and the dedup registry. Two requests that differ only
//! in the insertion order of query entries or JSON body fields produce the
//! same key.

use http::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::errors::RequestError;
use crate::request::RequestSpec;

/// Field separator in the canonical serialization.
const SEP: &[u8] = b"|";

/// Canonical fingerprint of a request.
///
/// A 32-character lowercase hex string: the 128-bit prefix of a SHA-256
/// digest, long enough to make collisions irrelevant for dedup and cache
/// maps while keeping keys cheap to clone and compare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives a key from request parts.
    ///
    /// Pure function, no I/O. The query map and body are optional; an empty
    /// query or empty/null body yields the same key as an absent one.
    pub fn derive(
        method: &Method,
        base_url: &str,
        path: &str,
        query: Option<&BTreeMap<String, Value>>,
        body: Option<&[u8]>,
    ) -> Result<Self, RequestError> {
        let base = Url::parse(base_url)
            .map_err(|e| RequestError::InvalidUrl(format!("{base_url}: {e}")))?;
        let url = base
            .join(path)
            .map_err(|e| RequestError::InvalidUrl(format!("{path}: {e}")))?;

        let mut pairs: Vec<(String, String)> = query
            .map(|q| {
                q.iter()
                    .map(|(k, v)| (k.clone(), crate::request::render_query_value(v)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self::digest(method, &url, &mut pairs, body))
    }

    /// Derives a key from an already materialized request.
    ///
    /// Agrees with [`derive`](Self::derive) whenever the materialization is
    /// canonical: the URL's query pairs are decoded, re-encoded, and sorted
    /// before hashing.
    #[must_use]
    pub fn derive_from_raw(method: &Method, url: &Url, body: Option<&[u8]>) -> Self {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut bare = url.clone();
        bare.set_query(None);

        Self::digest(method, &bare, &mut pairs, body)
    }

    /// Derives the key for a full request spec.
    pub fn for_spec(spec: &RequestSpec) -> Result<Self, RequestError> {
        Self::derive(
            spec.method(),
            spec.base_url(),
            spec.path(),
            Some(spec.query()),
            spec.body().map(|b| b.as_ref()),
        )
    }

    fn digest(
        method: &Method,
        bare_url: &Url,
        pairs: &mut Vec<(String, String)>,
        body: Option<&[u8]>,
    ) -> Self {
        pairs.sort();

        let mut hasher = Sha256::new();
        hasher.update(method.as_str().to_ascii_uppercase().as_bytes());
        hasher.update(SEP);
        hasher.update(bare_url.as_str().as_bytes());
        hasher.update(SEP);

        for (i, (key, value)) in pairs.iter().enumerate() {
            if i > 0 {
                hasher.update(b"&");
            }
            hasher.update(encode(key).as_bytes());
            hasher.update(b"=");
            hasher.update(encode(value).as_bytes());
        }
        hasher.update(SEP);

        match body {
            Some(bytes) if !bytes.is_empty() => match serde_json::from_slice::<Value>(bytes) {
                Ok(Value::Null) => {}
                Ok(value) => hasher.update(canonical_json(&value).as_bytes()),
                Err(_) => hasher.update(bytes),
            },
            _ => {}
        }

        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    /// The key as a hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn encode(text: &str) -> String {
    byte_serialize(text.as_bytes()).collect()
}

/// Serializes a JSON value with sorted object keys and stable array order.
///
/// `serde_json` never escapes forward slashes, so the output is usable as a
/// stable hashing form directly.
pub(crate) fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        _ => out.push_str(&serde_json::to_string(value).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(spec: &RequestSpec) -> CacheKey {
        CacheKey::for_spec(spec).unwrap()
    }

    #[test]
    fn test_key_shape() {
        let spec = RequestSpec::get("https://api.example", "/v1/users");
        let k = key(&spec);

        assert_eq!(k.as_str().len(), 32);
        assert!(k.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(k.as_str(), k.as_str().to_lowercase());
    }

    #[test]
    fn test_query_order_independent() {
        let a = CacheKey::derive(
            &Method::GET,
            "https://api.example",
            "/v1/users",
            Some(&BTreeMap::from([
                ("page".to_string(), json!(1)),
                ("sort".to_string(), json!("name")),
            ])),
            None,
        )
        .unwrap();

        let b = CacheKey::derive(
            &Method::GET,
            "https://api.example",
            "/v1/users",
            Some(&BTreeMap::from([
                ("sort".to_string(), json!("name")),
                ("page".to_string(), json!(1)),
            ])),
            None,
        )
        .unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_json_body_field_order_independent() {
        let base = RequestSpec::post("https://api.example", "/orders");

        let a = key(&base.clone().with_body(r#"{"a":1,"b":2}"#.as_bytes().to_vec()));
        let b = key(&base.clone().with_body(r#"{"b":2,"a":1}"#.as_bytes().to_vec()));

        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_body_field_order_independent() {
        let base = RequestSpec::post("https://api.example", "/orders");

        let a = key(&base.clone().with_body(r#"{"o":{"x":1,"y":[1,2]}}"#.as_bytes().to_vec()));
        let b = key(&base.clone().with_body(r#"{"o":{"y":[1,2],"x":1}}"#.as_bytes().to_vec()));

        assert_eq!(a, b);
    }

    #[test]
    fn test_array_order_is_significant() {
        let base = RequestSpec::post("https://api.example", "/orders");

        let a = key(&base.clone().with_body(r#"{"v":[1,2]}"#.as_bytes().to_vec()));
        let b = key(&base.clone().with_body(r#"{"v":[2,1]}"#.as_bytes().to_vec()));

        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_query_equals_absent_query() {
        let with_empty = CacheKey::derive(
            &Method::GET,
            "https://api.example",
            "/v1/users",
            Some(&BTreeMap::new()),
            None,
        )
        .unwrap();
        let without = CacheKey::derive(&Method::GET, "https://api.example", "/v1/users", None, None)
            .unwrap();

        assert_eq!(with_empty, without);
    }

    #[test]
    fn test_empty_and_null_body_equal_absent_body() {
        let derive = |body: Option<&[u8]>| {
            CacheKey::derive(&Method::POST, "https://api.example", "/orders", None, body).unwrap()
        };

        let absent = derive(None);
        assert_eq!(derive(Some(b"")), absent);
        assert_eq!(derive(Some(b"null")), absent);
    }

    #[test]
    fn test_method_distinguishes_keys() {
        let get = CacheKey::derive(&Method::GET, "https://api.example", "/r", None, None).unwrap();
        let del =
            CacheKey::derive(&Method::DELETE, "https://api.example", "/r", None, None).unwrap();

        assert_ne!(get, del);
    }

    #[test]
    fn test_opaque_body_hashes_bytes() {
        let base = RequestSpec::post("https://api.example", "/upload");

        let a = key(&base.clone().with_body(vec![0u8, 1, 2]));
        let b = key(&base.clone().with_body(vec![0u8, 1, 3]));

        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_agrees_with_materialized_request() {
        let spec = RequestSpec::get("https://api.example", "/v1/users")
            .with_query_param("page", 1)
            .with_query_param("sort", "name");

        let from_parts = key(&spec);
        let from_raw = CacheKey::derive_from_raw(
            spec.method(),
            &spec.materialize().unwrap(),
            spec.body().map(|b| b.as_ref()),
        );

        assert_eq!(from_parts, from_raw);
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": {"d": 2, "c": 1}, "a": [3, 1]});
        assert_eq!(canonical_json(&value), r#"{"a":[3,1],"b":{"c":1,"d":2}}"#);
    }

    #[test]
    fn test_canonical_json_keeps_slashes() {
        let value = json!({"url": "https://api.example/path"});
        assert_eq!(
            canonical_json(&value),
            r#"{"url":"https://api.example/path"}"#
        );
    }
}
