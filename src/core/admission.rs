//! Admission control for async and oneway invocations.
//!
//! Two independent [`AdmissionGate`]s (one per invocation style) bound the
//! number of calls in flight, protecting process memory when a peer is slow.
//! Waiters queue in FIFO order; an acquire that cannot complete within its
//! deadline surfaces as a distinct "too many requests" condition rather than
//! blocking indefinitely or being dropped.

use crate::error::{RemotingError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting semaphore bounding concurrent invocations of one style.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

impl AdmissionGate {
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    /// Acquire one permit, waiting at most `timeout`.
    ///
    /// Waiters are served in arrival order. Failure to acquire within the
    /// deadline is a [`RemotingError::TooManyRequests`].
    pub async fn try_acquire(&self, timeout: Duration) -> Result<OwnedSemaphorePermit> {
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(RemotingError::TooManyRequests(
                "admission gate closed".to_string(),
            )),
            Err(_) => Err(RemotingError::TooManyRequests(format!(
                "tryAcquire timed out after {}ms, available permits: {} of {}",
                timeout.as_millis(),
                self.semaphore.available_permits(),
                self.permits
            ))),
        }
    }

    /// Permits currently available, for diagnostics.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Returns a held permit to its gate exactly once, no matter how many code
/// paths (normal completion, timeout sweep, write failure) attempt release.
#[derive(Debug, Default)]
pub struct ReleaseOnce {
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl ReleaseOnce {
    pub fn new(permit: OwnedSemaphorePermit) -> Self {
        Self {
            permit: Mutex::new(Some(permit)),
        }
    }

    /// A guard holding no permit; release is a no-op. Used by the sync path,
    /// which is not admission-gated.
    pub fn disarmed() -> Self {
        Self::default()
    }

    /// Release the permit if still held. Subsequent calls do nothing.
    pub fn release(&self) {
        let permit = self
            .permit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(permit);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_within_limit() {
        let gate = AdmissionGate::new(2);
        let _a = gate.try_acquire(Duration::from_millis(50)).await.unwrap();
        let _b = gate.try_acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(gate.available(), 0);
    }

    #[tokio::test]
    async fn exhausted_gate_fails_after_deadline() {
        let gate = AdmissionGate::new(1);
        let held = gate.try_acquire(Duration::from_millis(50)).await.unwrap();

        let denied = gate.try_acquire(Duration::from_millis(20)).await;
        assert!(matches!(denied, Err(RemotingError::TooManyRequests(_))));

        drop(held);
        assert!(gate.try_acquire(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn release_once_is_idempotent() {
        let gate = AdmissionGate::new(1);
        let permit = gate.try_acquire(Duration::from_millis(50)).await.unwrap();

        let release = ReleaseOnce::new(permit);
        release.release();
        release.release();
        release.release();

        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn disarmed_release_is_noop() {
        let release = ReleaseOnce::disarmed();
        release.release();
    }
}
