//! Bounded task execution for request processors and response callbacks.
//!
//! A [`TaskExecutor`] wraps a slot semaphore around `tokio::spawn`: a task is
//! accepted only when a slot is free and the slot is returned when the task
//! finishes. Saturation is reported synchronously through [`RejectedTask`] so
//! the dispatcher can answer SYSTEM_BUSY instead of queueing without bound.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// The executor had no free slot for the submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RejectedTask;

/// Slot-bounded wrapper around the tokio runtime.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl TaskExecutor {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Spawn `task` if a slot is free, otherwise reject without spawning.
    pub fn try_spawn<F>(&self, task: F) -> Result<(), RejectedTask>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.slots.clone().try_acquire_owned() {
            Ok(slot) => {
                tokio::spawn(async move {
                    task.await;
                    drop(slot);
                });
                Ok(())
            }
            Err(_) => Err(RejectedTask),
        }
    }

    /// Slots currently free, for diagnostics.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn rejects_when_saturated() {
        let executor = TaskExecutor::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        executor
            .try_spawn(async move {
                let _ = release_rx.await;
            })
            .unwrap();

        assert_eq!(executor.try_spawn(async {}), Err(RejectedTask));

        release_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(executor.try_spawn(async {}).is_ok());
    }

    #[tokio::test]
    async fn slot_returned_after_completion() {
        let executor = TaskExecutor::new(2);
        executor.try_spawn(async {}).unwrap();
        executor.try_spawn(async {}).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(executor.available(), 2);
    }
}
