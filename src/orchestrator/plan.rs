//! Orchestration plans: typed nodes, results, and the transform seam.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

use crate::config::TaskConfig;
use crate::errors::OrchestrationError;
use crate::request::RequestSpec;

/// One node of a request DAG.
#[derive(Debug, Clone)]
pub struct RequestNode {
    id: String,
    spec: RequestSpec,
    config: TaskConfig,
    deps: Vec<String>,
}

impl RequestNode {
    /// Creates a node with a default task configuration.
    #[must_use]
    pub fn new(id: impl Into<String>, spec: RequestSpec) -> Self {
        Self {
            id: id.into(),
            spec,
            config: TaskConfig::new(),
            deps: Vec::new(),
        }
    }

    /// Sets the node's task configuration.
    #[must_use]
    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    /// Declares dependencies that must complete before this node starts.
    #[must_use]
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    /// The node id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The declared dependency ids.
    #[must_use]
    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    pub(crate) fn into_parts(self) -> (String, RequestSpec, TaskConfig) {
        (self.id, self.spec, self.config)
    }
}

/// Node results keyed by id.
///
/// Results are stored as raw bytes; the typed extraction methods are the
/// only place the orchestrator performs a downcast, and they fail with a
/// typed error rather than panicking.
#[derive(Debug, Default)]
pub struct ResultsMap {
    results: HashMap<String, Bytes>,
}

impl ResultsMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, id: String, bytes: Bytes) {
        self.results.insert(id, bytes);
    }

    /// The raw bytes for a node.
    pub fn bytes(&self, id: &str) -> Result<&Bytes, OrchestrationError> {
        self.results
            .get(id)
            .ok_or_else(|| OrchestrationError::ResultExtraction(format!("no result for node '{id}'")))
    }

    /// Deserializes a node's result as JSON.
    pub fn json<T: DeserializeOwned>(&self, id: &str) -> Result<T, OrchestrationError> {
        let bytes = self.bytes(id)?;
        serde_json::from_slice(bytes).map_err(|e| {
            OrchestrationError::ResultExtraction(format!("node '{id}' result mistyped: {e}"))
        })
    }

    /// Returns true if the node produced a result.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.results.contains_key(id)
    }

    /// The number of completed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if no node produced a result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

type Transform<T> = Box<dyn FnOnce(ResultsMap) -> Result<T, OrchestrationError> + Send>;

/// A node list plus the transform that shapes completed results into `T`.
pub struct OrchestrationPlan<T> {
    nodes: Vec<RequestNode>,
    transform: Transform<T>,
}

impl<T> OrchestrationPlan<T> {
    /// Creates a plan from nodes and a transform.
    #[must_use]
    pub fn new<F>(nodes: Vec<RequestNode>, transform: F) -> Self
    where
        F: FnOnce(ResultsMap) -> Result<T, OrchestrationError> + Send + 'static,
    {
        Self {
            nodes,
            transform: Box::new(transform),
        }
    }

    /// The plan's nodes.
    #[must_use]
    pub fn nodes(&self) -> &[RequestNode] {
        &self.nodes
    }

    pub(crate) fn into_parts(self) -> (Vec<RequestNode>, Transform<T>) {
        (self.nodes, self.transform)
    }
}

impl OrchestrationPlan<ResultsMap> {
    /// A plan whose result is the raw results map itself.
    #[must_use]
    pub fn collecting(nodes: Vec<RequestNode>) -> Self {
        Self::new(nodes, Ok)
    }
}

impl<T> std::fmt::Debug for OrchestrationPlan<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationPlan")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn node(id: &str) -> RequestNode {
        RequestNode::new(id, RequestSpec::get("https://api.example", format!("/{id}")))
    }

    #[test]
    fn test_node_builder() {
        let n = node("d").after(["b", "c"]);
        assert_eq!(n.id(), "d");
        assert_eq!(n.deps(), ["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_results_map_bytes_lookup() {
        let mut results = ResultsMap::new();
        results.insert("a".to_string(), Bytes::from_static(b"payload"));

        assert_eq!(results.bytes("a").unwrap().as_ref(), b"payload");
        assert!(matches!(
            results.bytes("missing"),
            Err(OrchestrationError::ResultExtraction(_))
        ));
    }

    #[test]
    fn test_results_map_typed_extraction() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: u64,
        }

        let mut results = ResultsMap::new();
        results.insert("user".to_string(), Bytes::from_static(br#"{"id":7}"#));

        assert_eq!(results.json::<User>("user").unwrap(), User { id: 7 });

        let err = results.json::<Vec<String>>("user").unwrap_err();
        assert!(matches!(err, OrchestrationError::ResultExtraction(_)));
    }

    #[test]
    fn test_collecting_plan_returns_map() {
        let plan = OrchestrationPlan::collecting(vec![node("a")]);
        assert_eq!(plan.nodes().len(), 1);

        let (_, transform) = plan.into_parts();
        let mut results = ResultsMap::new();
        results.insert("a".to_string(), Bytes::from_static(b"1"));

        let map = transform(results).unwrap();
        assert!(map.contains("a"));
    }
}
