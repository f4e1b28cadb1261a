//! Feedback capability for higher layers.
//!
//! The core never renders user-visible text; it reports noteworthy
//! conditions to a [`FeedbackSink`] and lets the embedding application
//! decide what (if anything) to show.

use tracing::warn;

/// Sink for conditions higher layers may want to surface.
pub trait FeedbackSink: Send + Sync {
    /// Called with a short, non-localized error description.
    fn on_error(&self, message: &str);

    /// Called when a token refresh fails terminally. Typical applications
    /// route this to a re-login flow.
    fn on_authentication_failed(&self);
}

/// A feedback sink that discards everything.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpFeedbackSink;

impl FeedbackSink for NoOpFeedbackSink {
    fn on_error(&self, _message: &str) {}

    fn on_authentication_failed(&self) {}
}

/// A feedback sink that logs through the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFeedbackSink;

impl FeedbackSink for LoggingFeedbackSink {
    fn on_error(&self, message: &str) {
        warn!(message, "request feedback");
    }

    fn on_authentication_failed(&self) {
        warn!("authentication failed terminally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
        auth_failures: Mutex<usize>,
    }

    impl FeedbackSink for RecordingSink {
        fn on_error(&self, message: &str) {
            self.messages.lock().push(message.to_string());
        }

        fn on_authentication_failed(&self) {
            *self.auth_failures.lock() += 1;
        }
    }

    #[test]
    fn test_recording_sink_collects() {
        let sink = Arc::new(RecordingSink::default());
        sink.on_error("boom");
        sink.on_authentication_failed();

        assert_eq!(sink.messages.lock().as_slice(), ["boom"]);
        assert_eq!(*sink.auth_failures.lock(), 1);
    }

    #[test]
    fn test_noop_sink_is_silent() {
        NoOpFeedbackSink.on_error("ignored");
        NoOpFeedbackSink.on_authentication_failed();
    }
}
