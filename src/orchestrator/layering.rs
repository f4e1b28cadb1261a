//! Plan validation and Kahn-style layering.

use std::collections::HashSet;

use super::RequestNode;
use crate::errors::OrchestrationError;

/// Rejects duplicate node ids and dependencies on undefined ids.
pub(crate) fn validate(nodes: &[RequestNode]) -> Result<(), OrchestrationError> {
    let mut ids = HashSet::new();
    for node in nodes {
        if !ids.insert(node.id()) {
            return Err(OrchestrationError::DuplicateNode(node.id().to_string()));
        }
    }

    for node in nodes {
        for dep in node.deps() {
            if !ids.contains(dep.as_str()) {
                return Err(OrchestrationError::UnknownDependency {
                    node: node.id().to_string(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Partitions the plan into dependency layers.
///
/// Each layer holds the ids of all nodes whose dependencies are already
/// completed, sorted for determinism. An iteration that selects no nodes
/// while nodes remain means the remainder forms a cycle.
pub(crate) fn layer(nodes: &[RequestNode]) -> Result<Vec<Vec<String>>, OrchestrationError> {
    let mut remaining: Vec<&RequestNode> = nodes.iter().collect();
    let mut completed: HashSet<&str> = HashSet::new();
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let (runnable, blocked): (Vec<&RequestNode>, Vec<&RequestNode>) = remaining
            .into_iter()
            .partition(|node| node.deps().iter().all(|dep| completed.contains(dep.as_str())));

        if runnable.is_empty() {
            let mut ids: Vec<String> = blocked.iter().map(|n| n.id().to_string()).collect();
            ids.sort_unstable();
            return Err(OrchestrationError::CyclicDependency { ids });
        }

        let mut ids: Vec<String> = runnable.iter().map(|n| n.id().to_string()).collect();
        ids.sort_unstable();

        for node in &runnable {
            completed.insert(node.id());
        }
        layers.push(ids);
        remaining = blocked;
    }

    Ok(layers)
}
