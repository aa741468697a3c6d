// Location: src/processing/queue.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Single-slot FIFO queue in front of a non-reentrant engine.
///
/// At most one holder of a [`SlotGuard`] exists at any time. Waiters are
/// released in arrival order (tokio's semaphore is fair) and at most
/// `capacity` of them may wait at once.
#[derive(Clone)]
pub struct GenerationQueue {
    slot: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<QueueCounters>,
}

#[derive(Debug, Default)]
struct QueueCounters {
    waiting: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicUsize,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub waiting: usize,
    pub in_flight: usize,
    pub completed: usize,
}

/// Holds the generation slot; dropping it admits the next waiter
#[derive(Debug)]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    stats: Arc<QueueCounters>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.stats.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decrements the waiting count whether the wait succeeds or is cancelled
struct WaitingGuard<'a>(&'a QueueCounters);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GenerationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            capacity,
            stats: Arc::new(QueueCounters::default()),
        }
    }

    /// Wait for the slot. Fails with `QueueFull` if `capacity` requests are already waiting.
    pub async fn acquire(&self) -> Result<SlotGuard> {
        let admitted = self
            .stats
            .waiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| {
                (waiting < self.capacity).then_some(waiting + 1)
            });
        if admitted.is_err() {
            return Err(EngineError::QueueFull {
                capacity: self.capacity,
            });
        }

        let waiting = WaitingGuard(&self.stats);
        debug!(waiting = self.stats.waiting.load(Ordering::SeqCst), "Waiting for generation slot");

        let permit = Arc::clone(&self.slot)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Inference {
                message: "Generation queue closed".to_string(),
                source: None,
            })?;
        drop(waiting);

        self.stats.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(SlotGuard {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            waiting: self.stats.waiting.load(Ordering::SeqCst),
            in_flight: self.stats.in_flight.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_single_slot() -> Result<()> {
        let queue = GenerationQueue::new(8);

        let guard = queue.acquire().await?;
        assert_eq!(queue.stats().in_flight, 1);

        // Second acquire must wait until the first guard is dropped
        let pending = tokio::time::timeout(Duration::from_millis(20), queue.acquire()).await;
        assert!(pending.is_err());
        assert_eq!(queue.stats().waiting, 0);

        drop(guard);
        let _second = queue.acquire().await?;
        let stats = queue.stats();
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.completed, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_fifo_release() -> Result<()> {
        let queue = GenerationQueue::new(8);
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = queue.acquire().await?;
        let mut handles = Vec::new();
        for i in 0..4 {
            let waiter = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _guard = waiter.acquire().await.unwrap();
                order.lock().await.push(i);
            }));
            // Let each waiter enqueue before spawning the next
            while queue.stats().waiting < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(first);
        for handle in futures::future::join_all(handles).await {
            handle.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_size_limit() -> Result<()> {
        let queue = GenerationQueue::new(1);
        let _holder = queue.acquire().await?;

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.acquire().await.map(|_| ()) })
        };
        while queue.stats().waiting < 1 {
            tokio::task::yield_now().await;
        }

        let result = queue.acquire().await;
        assert!(matches!(result, Err(EngineError::QueueFull { capacity: 1 })));

        waiter.abort();
        Ok(())
    }
}
