//! Bounded worker pool for download tasks.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 32;
pub const DEFAULT_WORKERS: usize = 6;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWidth { value: usize },

    #[error("worker semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Runs one task per item with at most `width` in flight.
///
/// Completion order is unordered; results come back in submission order so
/// callers can still correlate them by item. A task that panics is logged
/// and its result is missing from the output.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    width: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(DEFAULT_WORKERS)),
            width: DEFAULT_WORKERS,
        }
    }
}

impl WorkerPool {
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidWidth`] outside `1..=32`.
    pub fn new(width: usize) -> Result<Self, PoolError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&width) {
            return Err(PoolError::InvalidWidth { value: width });
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(width)),
            width,
        })
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Spawns `work(item)` for every item and waits for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::SemaphoreClosed`] if the permit source closes.
    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, work: F) -> Result<Vec<T>, PoolError>
    where
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let work = Arc::new(work);
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| PoolError::SemaphoreClosed)?;
            let work = Arc::clone(&work);
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                work(item).await
            }));
        }

        debug!(tasks = handles.len(), width = self.width, "waiting for workers");
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(error) => warn!(error = %error, "worker task panicked"),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_width_bounds() {
        assert!(WorkerPool::new(0).is_err());
        assert!(WorkerPool::new(33).is_err());
        assert_eq!(WorkerPool::new(4).unwrap().width(), 4);
        assert_eq!(WorkerPool::default().width(), DEFAULT_WORKERS);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_width() {
        let pool = WorkerPool::new(3).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            pool.run((0..20).collect(), move |i: usize| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    i * 2
                }
            })
            .await
            .unwrap()
        };

        assert_eq!(results, (0..20).map(|i| i * 2).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }
}
