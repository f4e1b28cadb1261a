//! Layered DAG execution over the task executor.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{layering, OrchestrationPlan, RequestNode, ResultsMap};
use crate::cancellation::CancellationToken;
use crate::errors::{OrchestrationError, RequestError};
use crate::executor::TaskExecutor;
use serde::{Deserialize, Serialize};

/// How node failures affect the rest of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailureStrategy {
    /// The first node error aborts the layer and is raised immediately.
    #[default]
    FailFast,
    /// Failed nodes are recorded; nodes depending on them are skipped and
    /// marked failed, everything else keeps running.
    ContinueOnError,
}

/// How a cancelled node affects its descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CancellationStrategy {
    /// A cancelled node cancels the rest of the orchestration.
    #[default]
    Cascading,
    /// A cancelled node is treated as an ordinary failure; its descendants
    /// are skipped through the normal failure path and unrelated branches
    /// keep running.
    Isolate,
}

/// Executes request DAGs layer by layer.
///
/// Nodes within a layer run concurrently; the next layer starts only after
/// every node of the current one has reached a terminal state.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    executor: TaskExecutor,
}

impl Orchestrator {
    /// Creates an orchestrator over an executor.
    #[must_use]
    pub fn new(executor: TaskExecutor) -> Self {
        Self { executor }
    }

    /// Runs a plan with the default (cascading) cancellation strategy.
    pub async fn orchestrate<T>(
        &self,
        plan: OrchestrationPlan<T>,
        strategy: FailureStrategy,
    ) -> Result<T, OrchestrationError> {
        self.orchestrate_scoped(plan, strategy, CancellationStrategy::default(), None)
            .await
    }

    /// Runs a plan under an ambient cancellation scope.
    pub async fn orchestrate_scoped<T>(
        &self,
        plan: OrchestrationPlan<T>,
        strategy: FailureStrategy,
        cancellation: CancellationStrategy,
        ambient: Option<&Arc<CancellationToken>>,
    ) -> Result<T, OrchestrationError> {
        let (nodes, transform) = plan.into_parts();

        layering::validate(&nodes)?;
        let layers = layering::layer(&nodes)?;

        let mut node_map: HashMap<String, RequestNode> = nodes
            .into_iter()
            .map(|node| (node.id().to_string(), node))
            .collect();

        let scope = match ambient {
            Some(ambient) => ambient.child(),
            None => CancellationToken::new(),
        };

        let mut results = ResultsMap::new();
        let mut failed: HashMap<String, RequestError> = HashMap::new();

        for layer_ids in layers {
            if scope.is_cancelled() {
                return Err(cancelled_error(&scope));
            }

            // Split the layer into runnable nodes and nodes whose
            // dependencies already failed or were skipped.
            let mut runnable = Vec::new();
            for id in layer_ids {
                let Some(node) = node_map.remove(&id) else {
                    continue;
                };

                if let Some(dep) = node.deps().iter().find(|dep| failed.contains_key(*dep)) {
                    debug!(node = %id, dependency = %dep, "skipping node, dependency failed");
                    failed.insert(
                        id,
                        RequestError::cancelled(format!("skipped: dependency '{dep}' failed")),
                    );
                    continue;
                }

                runnable.push(node);
            }

            if runnable.is_empty() {
                continue;
            }
            let runnable_count = runnable.len();

            let layer_token = scope.child();
            let mut set = JoinSet::new();
            for node in runnable {
                let executor = self.executor.clone();
                let token = layer_token.clone();
                let (id, spec, config) = node.into_parts();

                set.spawn(async move {
                    let work = executor.execute_scoped(spec, config, Some(&token));
                    let result = AssertUnwindSafe(work)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            Err(RequestError::Unknown("node task panicked".to_string()))
                        });
                    (id, result)
                });
            }

            let mut layer_failures: HashMap<String, RequestError> = HashMap::new();
            let mut layer_successes = 0usize;

            while let Some(joined) = set.join_next().await {
                let Ok((id, result)) = joined else {
                    continue;
                };

                match result {
                    Ok(bytes) => {
                        layer_successes += 1;
                        results.insert(id, bytes);
                    }
                    Err(err) => match strategy {
                        FailureStrategy::FailFast => {
                            // Cooperative cancel for in-flight transports;
                            // dropping the join set aborts the sibling tasks.
                            layer_token.cancel("sibling node failed");
                            return Err(OrchestrationError::node_failed(id, err));
                        }
                        FailureStrategy::ContinueOnError => {
                            if err.is_cancelled() && cancellation == CancellationStrategy::Cascading
                            {
                                scope.cancel(format!("node '{id}' cancelled"));
                                return Err(cancelled_error(&scope));
                            }

                            warn!(node = %id, error = %err, "node failed, continuing");
                            layer_failures.insert(id.clone(), err.clone());
                            failed.insert(id, err);
                        }
                    },
                }
            }

            if layer_successes == 0 && runnable_count > 0 {
                return Err(OrchestrationError::AllNodesFailed {
                    failures: layer_failures,
                });
            }
        }

        transform(results)
    }
}

fn cancelled_error(scope: &Arc<CancellationToken>) -> OrchestrationError {
    OrchestrationError::Cancelled {
        reason: scope.reason().unwrap_or_else(|| "cancelled".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RefreshCoordinator;
    use crate::cache::CacheStore;
    use crate::cancellation::OwnerHandle;
    use crate::config::{Lifecycle, TaskConfig};
    use crate::gate::ControlGate;
    use crate::request::RequestSpec;
    use crate::testing::mocks::{RoutingEngine, ScriptedCall};
    use http::StatusCode;
    use std::time::{Duration, Instant};

    fn orchestrator(engine: Arc<RoutingEngine>) -> Orchestrator {
        Orchestrator::new(TaskExecutor::new(
            engine,
            Arc::new(CacheStore::new()),
            Arc::new(ControlGate::new()),
            Arc::new(RefreshCoordinator::new()),
        ))
    }

    fn node(id: &str) -> RequestNode {
        RequestNode::new(id, RequestSpec::get("https://api.example", format!("/{id}")))
    }

    fn diamond() -> Vec<RequestNode> {
        vec![
            node("a"),
            node("b").after(["a"]),
            node("c").after(["a"]),
            node("d").after(["b", "c"]),
        ]
    }

    #[tokio::test]
    async fn test_diamond_runs_in_dependency_order() {
        let engine = RoutingEngine::new();
        let results = orchestrator(engine.clone())
            .orchestrate(
                OrchestrationPlan::collecting(diamond()),
                FailureStrategy::FailFast,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results.bytes("d").unwrap().as_ref(), b"/d");

        let calls = engine.calls();
        assert_eq!(calls.first().map(String::as_str), Some("/a"));
        assert_eq!(calls.last().map(String::as_str), Some("/d"));
        assert_eq!(calls.len(), 4);
    }

    #[tokio::test]
    async fn test_layer_barrier_holds_under_latency() {
        let engine = RoutingEngine::new();
        // Even with `a` slow, `b` and `c` must not start before it finishes.
        engine.route(
            "/a",
            ScriptedCall::respond(StatusCode::OK, "/a").after(Duration::from_millis(60)),
        );

        let started = Instant::now();
        orchestrator(engine.clone())
            .orchestrate(
                OrchestrationPlan::collecting(diamond()),
                FailureStrategy::FailFast,
            )
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(engine.calls().first().map(String::as_str), Some("/a"));
    }

    #[tokio::test]
    async fn test_fail_fast_aborts_layer_and_names_node() {
        let engine = RoutingEngine::new();
        engine.route(
            "/b",
            ScriptedCall::respond(StatusCode::OK, "/b").after(Duration::from_millis(500)),
        );
        engine.route(
            "/c",
            ScriptedCall::respond(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        );

        let started = Instant::now();
        let err = orchestrator(engine.clone())
            .orchestrate(
                OrchestrationPlan::collecting(diamond()),
                FailureStrategy::FailFast,
            )
            .await
            .unwrap_err();

        assert_eq!(err.node_id(), Some("c"));
        // `b` was cancelled rather than awaited, `d` never started.
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(!engine.calls().contains(&"/d".to_string()));
    }

    #[tokio::test]
    async fn test_continue_on_error_skips_dependents_only() {
        let engine = RoutingEngine::new();
        engine.route(
            "/c",
            ScriptedCall::respond(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        );

        let nodes = vec![
            node("a"),
            node("c").after(["a"]),
            node("d").after(["c"]),
            node("e").after(["a"]),
        ];

        let results = orchestrator(engine.clone())
            .orchestrate(
                OrchestrationPlan::collecting(nodes),
                FailureStrategy::ContinueOnError,
            )
            .await
            .unwrap();

        assert!(results.contains("a"));
        assert!(results.contains("e"));
        assert!(!results.contains("c"));
        assert!(!results.contains("d"));
        assert!(!engine.calls().contains(&"/d".to_string()));
    }

    #[tokio::test]
    async fn test_all_failed_layer_raises_aggregate() {
        let engine = RoutingEngine::new();
        engine.route(
            "/x",
            ScriptedCall::respond(StatusCode::INTERNAL_SERVER_ERROR, ""),
        );
        engine.route("/y", ScriptedCall::error(RequestError::NoNetwork));

        let err = orchestrator(engine)
            .orchestrate(
                OrchestrationPlan::collecting(vec![node("x"), node("y")]),
                FailureStrategy::ContinueOnError,
            )
            .await
            .unwrap_err();

        match err {
            OrchestrationError::AllNodesFailed { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures.contains_key("x"));
                assert!(failures.contains_key("y"));
            }
            other => panic!("expected aggregate error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cascading_cancellation_aborts_orchestration() {
        let engine = RoutingEngine::new();
        engine.route(
            "/a",
            ScriptedCall::respond(StatusCode::OK, "/a").after(Duration::from_millis(300)),
        );

        let owner = OwnerHandle::new();
        let nodes = vec![
            node("a").with_config(
                TaskConfig::new().with_lifecycle(Lifecycle::BoundToOwner(owner.binding())),
            ),
            node("b"),
            node("later").after(["a"]),
        ];

        let run = {
            let orchestrator = orchestrator(engine.clone());
            tokio::spawn(async move {
                orchestrator
                    .orchestrate_scoped(
                        OrchestrationPlan::collecting(nodes),
                        FailureStrategy::ContinueOnError,
                        CancellationStrategy::Cascading,
                        None,
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        owner.release();

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled { .. }));
        assert!(!engine.calls().contains(&"/later".to_string()));
    }

    #[tokio::test]
    async fn test_isolate_treats_cancellation_as_normal_failure() {
        let engine = RoutingEngine::new();
        engine.route(
            "/a",
            ScriptedCall::respond(StatusCode::OK, "/a").after(Duration::from_millis(100)),
        );

        let owner = OwnerHandle::new();
        let nodes = vec![
            node("a").with_config(
                TaskConfig::new().with_lifecycle(Lifecycle::BoundToOwner(owner.binding())),
            ),
            node("b"),
            node("later").after(["a"]),
        ];

        let run = {
            let orchestrator = orchestrator(engine.clone());
            tokio::spawn(async move {
                orchestrator
                    .orchestrate_scoped(
                        OrchestrationPlan::collecting(nodes),
                        FailureStrategy::ContinueOnError,
                        CancellationStrategy::Isolate,
                        None,
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        owner.release();

        let results = run.await.unwrap().unwrap();
        assert!(results.contains("b"));
        assert!(!results.contains("a"));
        assert!(!results.contains("later"));
    }

    #[tokio::test]
    async fn test_typed_transform() {
        let engine = RoutingEngine::new();
        engine.route("/a", ScriptedCall::respond(StatusCode::OK, r#"{"n":1}"#));
        engine.route("/b", ScriptedCall::respond(StatusCode::OK, r#"{"n":2}"#));

        #[derive(serde::Deserialize)]
        struct Count {
            n: u32,
        }

        let plan = OrchestrationPlan::new(vec![node("a"), node("b")], |results| {
            let a: Count = results.json("a")?;
            let b: Count = results.json("b")?;
            Ok(a.n + b.n)
        });

        let total = orchestrator(engine)
            .orchestrate(plan, FailureStrategy::FailFast)
            .await
            .unwrap();

        assert_eq!(total, 3);
    }
}
