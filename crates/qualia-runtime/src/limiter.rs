//! Request batching and rate limiting.
//!
//! [`RateLimiter`] enforces a minimum interval between granted requests
//! with a single outstanding permit — no burst credit, one waiter admitted
//! at a time. [`BatchProcessor`] accumulates items and hands the whole
//! accumulated set to its handler each time the limiter grants; items
//! arriving during an in-flight handler invocation queue for the next
//! cycle and are never dropped.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// RateLimiter
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum-interval rate limiter.
pub struct RateLimiter {
    interval: Duration,
    /// Holding this lock across the sleep is what serializes waiters into
    /// the single-permit model.
    last_grant: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A limiter granting at most `rate_per_minute` permits per minute.
    #[must_use]
    pub fn new(rate_per_minute: u32) -> Self {
        let per_minute = rate_per_minute.max(1);
        Self {
            interval: Duration::from_secs_f64(60.0 / f64::from(per_minute)),
            last_grant: tokio::sync::Mutex::new(None),
        }
    }

    /// The enforced minimum interval between grants.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the minimum interval since the last grant has elapsed,
    /// then take the permit.
    pub async fn acquire(&self) {
        let mut last = self.last_grant.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchProcessor
// ─────────────────────────────────────────────────────────────────────────────

/// Accumulates items and processes them in limiter-paced batches.
///
/// The worker task is aborted when the processor is dropped; queued items
/// are only lost if the process exits before the next grant.
pub struct BatchProcessor<T> {
    queue: Arc<Mutex<Vec<T>>>,
    wakeup: Arc<Notify>,
    worker: JoinHandle<()>,
}

impl<T: Send + 'static> BatchProcessor<T> {
    /// Start a processor that feeds `handler` full drained batches.
    #[must_use]
    pub fn new<H, Fut>(limiter: Arc<RateLimiter>, handler: H) -> Self
    where
        H: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let queue: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let wakeup = Arc::new(Notify::new());

        let worker = tokio::spawn({
            let queue = Arc::clone(&queue);
            let wakeup = Arc::clone(&wakeup);
            async move {
                loop {
                    while queue.lock().is_empty() {
                        wakeup.notified().await;
                    }
                    limiter.acquire().await;

                    // Drain everything accumulated up to this instant;
                    // anything added while the handler runs belongs to the
                    // next cycle.
                    let batch: Vec<T> = std::mem::take(&mut *queue.lock());
                    if batch.is_empty() {
                        continue;
                    }
                    debug!(batch_len = batch.len(), "dispatching batch");
                    handler(batch).await;
                }
            }
        });

        Self {
            queue,
            wakeup,
            worker,
        }
    }

    /// Queue an item for the next batch.
    pub fn add(&self, item: T) {
        self.queue.lock().push(item);
        self.wakeup.notify_one();
    }

    /// Number of items waiting for the next cycle.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl<T> Drop for BatchProcessor<T> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
