//! Token capabilities and the refresh coordinator.
//!
//! The pipeline stamps a token from a [`TokenStore`] onto every attempt and,
//! on an unauthorized response, asks the [`RefreshCoordinator`] for a new
//! one. The coordinator coalesces concurrent refresh attempts into a single
//! shared call so a burst of 401s produces exactly one refresh.

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::errors::RequestError;

/// Read/write access to the current credential.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The current token, if one is available.
    async fn get(&self) -> Option<String>;

    /// Replaces the current token.
    async fn set(&self, token: String);
}

/// Capability that obtains a fresh credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtains a new token, e.g. by redeeming a refresh token.
    async fn refresh(&self) -> Result<String, RequestError>;
}

type SharedRefresh = Shared<BoxFuture<'static, Result<String, RequestError>>>;

/// Coalesces concurrent token refreshes into one.
///
/// At any instant at most one refresh is in progress per coordinator. All
/// concurrent callers await the same shared future and observe the same
/// token or the same error; the slot is cleared once that future reaches a
/// terminal state.
#[derive(Default)]
pub struct RefreshCoordinator {
    ongoing: Mutex<Option<SharedRefresh>>,
}

impl RefreshCoordinator {
    /// Creates a new coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refreshes the token, attaching to an in-progress refresh if one exists.
    pub async fn refresh(
        &self,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Result<String, RequestError> {
        let shared = {
            let mut slot = self.ongoing.lock();
            match slot.as_ref() {
                Some(ongoing) => ongoing.clone(),
                None => {
                    let fresh: SharedRefresh =
                        async move { refresher.refresh().await }.boxed().shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };

        let result = shared.clone().await;

        // Clear the slot, but only if it still holds this refresh; a newer
        // one may already have taken its place.
        let mut slot = self.ongoing.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&shared)) {
            *slot = None;
        }

        result
    }

    /// Returns true while a refresh is in progress.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.ongoing.lock().is_some()
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}
