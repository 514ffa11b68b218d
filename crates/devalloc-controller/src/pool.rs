//! Bounded concurrency for driver calls.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Caps the number of driver operations running at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool admitting `size` concurrent operations (at least one).
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Configured pool size.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Run `work` once a worker is free.
    ///
    /// Returns `None` if the pool has been closed.
    pub async fn run<F, T>(&self, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.permits.acquire().await.ok()?;
        Some(work.await)
    }

    /// Stop admitting new work. Work already admitted runs to completion.
    pub fn close(&self) {
        self.permits.close();
    }
}
