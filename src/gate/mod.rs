//! Control gate: debounce, throttle, and single-flight deduplication.
//!
//! The gate shapes request initiation over time and coalesces equivalent
//! concurrent requests. All state is keyed by [`CacheKey`] and lives behind
//! a single mutex, so the dedup check and placeholder insertion are atomic
//! with respect to other callers — no suspension point sits between them.

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

use crate::cache::CacheKey;
use crate::cancellation::{CancellationToken, ReleaseGuard};
use crate::config::ControlPolicy;
use crate::errors::RequestError;

/// Handle to a shared in-flight task producing response bytes.
///
/// Cloneable; every holder that awaits it observes the same bytes or the
/// same terminal error.
pub type TaskHandle = Shared<BoxFuture<'static, Result<Bytes, RequestError>>>;

/// One slot in the dedup registry.
enum InFlight {
    /// Reservation held between the dedup check and the creation of the
    /// real task handle. Waiters park on the notify and re-check once the
    /// slot resolves.
    Placeholder(Arc<Notify>),
    /// A live task handle.
    Running(TaskHandle),
}

/// What the gate decided for a request.
pub enum GateOutcome {
    /// Proceed to execution. Carries the in-flight reservation when
    /// deduplication made one; dropping it releases the slot.
    Proceed(Option<ReleaseGuard>),
    /// Attach to an equivalent in-flight task instead of executing.
    Attach(TaskHandle),
}

impl std::fmt::Debug for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed(reservation) => f
                .debug_tuple("Proceed")
                .field(&reservation.is_some())
                .finish(),
            Self::Attach(_) => f.debug_tuple("Attach").finish(),
        }
    }
}

#[derive(Default)]
struct GateState {
    in_flight: HashMap<CacheKey, InFlight>,
    throttle_last_fire: HashMap<CacheKey, Instant>,
    debounce_waiters: HashMap<CacheKey, Arc<CancellationToken>>,
}

/// Shapes request initiation and deduplicates equivalent concurrent work.
#[derive(Default)]
pub struct ControlGate {
    state: Mutex<GateState>,
}

impl ControlGate {
    /// Creates a new gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a request through the gate.
    ///
    /// Order: dedup registry first (attach, or reserve the slot), then the
    /// throttle wait, then the debounce wait. Every wait is cancellable; a
    /// cancellation surfaces as [`RequestError::Cancelled`] and releases the
    /// reservation.
    pub async fn pass(
        self: &Arc<Self>,
        key: &CacheKey,
        policy: &ControlPolicy,
        cancel: &Arc<CancellationToken>,
    ) -> Result<GateOutcome, RequestError> {
        let mut reservation = None;

        if policy.deduplicate {
            loop {
                let waiter = {
                    let mut state = self.state.lock();
                    match state.in_flight.get(key) {
                        Some(InFlight::Running(handle)) => {
                            return Ok(GateOutcome::Attach(handle.clone()));
                        }
                        Some(InFlight::Placeholder(notify)) => notify.clone(),
                        None => {
                            state.in_flight.insert(
                                key.clone(),
                                InFlight::Placeholder(Arc::new(Notify::new())),
                            );
                            let gate = self.clone();
                            let key = key.clone();
                            reservation = Some(ReleaseGuard::new(move || {
                                gate.unregister_in_flight(&key);
                            }));
                            break;
                        }
                    }
                };

                // A newer arrival supersedes a holder still in its debounce
                // window; cancelling it releases the slot we are waiting on.
                if policy.debounce.is_some() {
                    let prior = self.state.lock().debounce_waiters.remove(key);
                    if let Some(prior) = prior {
                        prior.cancel("superseded by newer request");
                    }
                }

                self.wait_for_slot(key, &waiter, cancel).await?;
            }
        }

        match self.shape(key, policy, cancel).await {
            Ok(()) => Ok(GateOutcome::Proceed(reservation)),
            Err(err) => {
                // The reservation guard drops here and releases the slot.
                Err(err)
            }
        }
    }

    /// Waits until a placeholder slot resolves (or is released).
    async fn wait_for_slot(
        &self,
        key: &CacheKey,
        waiter: &Arc<Notify>,
        cancel: &Arc<CancellationToken>,
    ) -> Result<(), RequestError> {
        let mut notified = pin!(waiter.notified());
        notified.as_mut().enable();

        // The slot may have resolved between sampling and registering.
        {
            let state = self.state.lock();
            match state.in_flight.get(key) {
                Some(InFlight::Placeholder(current)) if Arc::ptr_eq(current, waiter) => {}
                _ => return Ok(()),
            }
        }

        tokio::select! {
            () = notified => Ok(()),
            () = cancel.cancelled() => Err(cancellation_error(cancel)),
        }
    }

    /// Applies throttle then debounce for a key.
    async fn shape(
        &self,
        key: &CacheKey,
        policy: &ControlPolicy,
        cancel: &Arc<CancellationToken>,
    ) -> Result<(), RequestError> {
        if let Some(interval) = policy.throttle {
            let remaining = {
                let state = self.state.lock();
                state
                    .throttle_last_fire
                    .get(key)
                    .and_then(|last| interval.checked_sub(last.elapsed()))
            };

            if let Some(remaining) = remaining {
                tokio::select! {
                    () = tokio::time::sleep(remaining) => {}
                    () = cancel.cancelled() => return Err(cancellation_error(cancel)),
                }
            }

            self.state
                .lock()
                .throttle_last_fire
                .insert(key.clone(), Instant::now());
        }

        if let Some(window) = policy.debounce {
            let waiter = CancellationToken::new();
            let prior = {
                let mut state = self.state.lock();
                state.debounce_waiters.insert(key.clone(), waiter.clone())
            };
            if let Some(prior) = prior {
                prior.cancel("superseded by newer request");
            }

            let outcome = tokio::select! {
                () = tokio::time::sleep(window) => Ok(()),
                () = waiter.cancelled() => Err(RequestError::cancelled(
                    waiter.reason().unwrap_or_else(|| "superseded".to_string()),
                )),
                () = cancel.cancelled() => Err(cancellation_error(cancel)),
            };

            // Remove our waiter entry unless a newer arrival replaced it.
            {
                let mut state = self.state.lock();
                if state
                    .debounce_waiters
                    .get(key)
                    .is_some_and(|current| Arc::ptr_eq(current, &waiter))
                {
                    state.debounce_waiters.remove(key);
                }
            }

            outcome?;
        }

        Ok(())
    }

    /// Replaces a placeholder with the real task handle.
    ///
    /// Waiters parked during the startup window are woken and attach.
    pub fn update_in_flight(&self, key: &CacheKey, handle: TaskHandle) {
        let mut state = self.state.lock();
        let prior = state
            .in_flight
            .insert(key.clone(), InFlight::Running(handle));
        drop(state);

        if let Some(InFlight::Placeholder(notify)) = prior {
            notify.notify_waiters();
        }
    }

    /// Removes the in-flight entry for a key.
    ///
    /// Called on every terminal transition of the owning task; waiters
    /// parked on a placeholder are woken so they can claim the slot.
    pub fn unregister_in_flight(&self, key: &CacheKey) {
        let removed = self.state.lock().in_flight.remove(key);

        if let Some(InFlight::Placeholder(notify)) = removed {
            notify.notify_waiters();
        }
    }

    /// The number of keys currently registered in the dedup registry.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

impl std::fmt::Debug for ControlGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlGate")
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

fn cancellation_error(cancel: &Arc<CancellationToken>) -> RequestError {
    RequestError::cancelled(cancel.reason().unwrap_or_else(|| "cancelled".to_string()))
}
