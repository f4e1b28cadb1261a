//! Owner-lifetime binding for request cancellation.
//!
//! A task configured with `Lifecycle::BoundToOwner` must be cancelled when
//! its owning object goes away. The owner holds an [`OwnerHandle`] and hands
//! out cheap [`OwnerBinding`] clones; tearing down the handle (explicitly or
//! by drop) cancels every bound task.

use super::CancellationToken;
use std::sync::Arc;

/// Cancellation reason used when an owner is torn down.
const OWNER_RELEASED: &str = "owner released";

/// A handle held by the owning object of bound requests.
///
/// Dropping the handle, or calling [`release`](Self::release), cancels all
/// requests bound to it. The handle is deliberately not `Clone`; share
/// [`OwnerBinding`]s instead.
#[derive(Debug)]
pub struct OwnerHandle {
    token: Arc<CancellationToken>,
}

impl OwnerHandle {
    /// Creates a new owner handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a binding that ties request lifetimes to this owner.
    #[must_use]
    pub fn binding(&self) -> OwnerBinding {
        OwnerBinding {
            token: self.token.clone(),
        }
    }

    /// Cancels all bound requests now, without waiting for drop.
    pub fn release(&self) {
        self.token.cancel(OWNER_RELEASED);
    }

    /// Returns true if this owner has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for OwnerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OwnerHandle {
    fn drop(&mut self) {
        self.token.cancel(OWNER_RELEASED);
    }
}

/// A cheap, cloneable binding carried inside task configuration.
#[derive(Debug, Clone)]
pub struct OwnerBinding {
    token: Arc<CancellationToken>,
}

impl OwnerBinding {
    /// The owner's cancellation token.
    #[must_use]
    pub fn token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Returns true if the owner has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_outlives_handle() {
        let handle = OwnerHandle::new();
        let binding = handle.binding();

        assert!(!binding.is_released());

        drop(handle);

        assert!(binding.is_released());
    }

    #[test]
    fn test_explicit_release() {
        let handle = OwnerHandle::new();
        let binding = handle.binding();

        handle.release();

        assert!(handle.is_released());
        assert!(binding.is_released());
        assert_eq!(
            binding.token().reason(),
            Some("owner released".to_string())
        );
    }
}
