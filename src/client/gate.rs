//! Concurrency Gate Module
//!
//! Bounds the number of simultaneously executing requests. Excess callers wait
//! in a FIFO queue and are admitted one by one as running tasks finish.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::ApiError;

/// Decrements a counter when dropped, so cancelled futures still release it.
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> (Self, usize) {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        (Self(counter), now)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// == Concurrency Gate ==
/// FIFO admission control over a fair semaphore.
#[derive(Debug)]
pub struct ConcurrencyGate {
    slots: Semaphore,
    max_concurrent: usize,
    active: AtomicUsize,
    queued: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Semaphore::new(max_concurrent),
            max_concurrent,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    // == Run ==
    /// Runs `task` once a slot is free and returns its output.
    ///
    /// Fails with [`ApiError::Config`] if the gate was closed while waiting.
    pub async fn run<F, T>(&self, task: F) -> Result<T, ApiError>
    where
        F: Future<Output = T>,
    {
        let permit = {
            let (_queued, waiting) = CountGuard::enter(&self.queued);
            if waiting > 1 || self.slots.available_permits() == 0 {
                debug!(waiting, "concurrency gate saturated, queueing request");
            }
            self.slots
                .acquire()
                .await
                .map_err(|_| ApiError::Config("concurrency gate is closed".to_string()))?
        };

        let (_active, running) = CountGuard::enter(&self.active);
        self.peak.fetch_max(running, Ordering::SeqCst);

        let output = task.await;
        drop(permit);
        Ok(output)
    }

    /// Rejects queued and future callers. Running tasks finish normally.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Tasks currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Callers currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Highest number of tasks ever running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_peak_never_exceeds_limit() {
        let gate = Arc::new(ConcurrencyGate::new(3));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.run(async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        i
                    })
                    .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(gate.peak(), 3);
        assert_eq!(gate.active(), 0);
        assert_eq!(gate.queued(), 0);
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let gate = Arc::new(ConcurrencyGate::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let blocker = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.run(tokio::time::sleep(Duration::from_millis(50)))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut waiters = Vec::new();
        for i in 0..5 {
            let gate = gate.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                gate.run(async move { order.lock().push(i) }).await.unwrap()
            }));
            // Make sure each waiter has queued before the next one arrives
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        blocker.await.unwrap();
        for waiter in waiters {
            waiter.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_closed_gate_rejects_waiters() {
        let gate = Arc::new(ConcurrencyGate::new(1));

        let running = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.run(tokio::time::sleep(Duration::from_millis(50)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let queued = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.run(async { 1 }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.close();

        assert!(running.await.unwrap().is_ok());
        assert!(matches!(queued.await.unwrap(), Err(ApiError::Config(_))));
    }
}
