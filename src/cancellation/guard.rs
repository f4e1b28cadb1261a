//! Drop guard for guaranteed slot release.

/// Guard that runs a release action when dropped.
///
/// Used to guarantee that in-flight registry slots are released on every
/// exit path — success, error, or cancellation mid-await.
pub struct ReleaseGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ReleaseGuard {
    /// Creates a new release guard.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Disarms the guard, preventing the release action from running.
    pub fn disarm(&mut self) {
        self.release = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ReleaseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseGuard")
            .field("armed", &self.release.is_some())
            .finish()
    }
}
