//! Multi-request orchestration over a dependency graph.
//!
//! This module provides:
//! - Typed request nodes and plans with a transform seam
//! - Plan validation and deterministic Kahn-style layering
//! - Layer-barrier concurrent execution with fail-fast or
//!   continue-on-error semantics

mod layering;
mod plan;
mod runner;

pub use plan::{OrchestrationPlan, RequestNode, ResultsMap};
pub use runner::{CancellationStrategy, FailureStrategy, Orchestrator};
