//! Test support: mock engines, token stores, refreshers, and sinks.
//!
//! Exported so downstream crates can exercise their own pipelines without a
//! live transport.

pub mod mocks;

pub use mocks::{
    MockEngine, RecordingFeedbackSink, RoutingEngine, ScriptedCall, ScriptedRefresher,
    StaticTokenStore,
};
