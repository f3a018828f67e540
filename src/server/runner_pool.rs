//! Runner pool for bounded concurrent inference

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::runtime::ModelRunner;

/// Largest accepted concurrency limit
pub const MAX_CONCURRENCY: usize = 8;

type Idle = Arc<Mutex<VecDeque<Arc<dyn ModelRunner>>>>;

/// Pool of runner handles guarded by a fair semaphore.
///
/// The pool holds exactly one handle per permit. A handle is returned to the
/// idle queue before its permit is released, so whoever acquires a permit
/// always finds a handle waiting.
pub struct RunnerPool {
    /// Idle handles
    idle: Idle,

    /// One permit per handle
    semaphore: Arc<Semaphore>,

    /// Concurrency limit
    limit: usize,
}

impl RunnerPool {
    /// Pool of distinct runners, one per slot.
    pub fn pooled(runners: Vec<Arc<dyn ModelRunner>>) -> Result<Self> {
        let limit = check_limit(runners.len())?;
        Ok(Self::from_handles(runners.into_iter().collect(), limit))
    }

    /// One runner that tolerates interleaved generations, shared by `limit` slots.
    pub fn shared(runner: Arc<dyn ModelRunner>, limit: usize) -> Result<Self> {
        let limit = check_limit(limit)?;
        let handles = std::iter::repeat_with(|| Arc::clone(&runner))
            .take(limit)
            .collect();
        Ok(Self::from_handles(handles, limit))
    }

    fn from_handles(handles: VecDeque<Arc<dyn ModelRunner>>, limit: usize) -> Self {
        debug!("Runner pool created with {} slots", limit);
        Self {
            idle: Arc::new(Mutex::new(handles)),
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Take a slot without waiting.
    pub fn try_acquire(&self) -> Option<RunnerGuard> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.checkout(permit).ok()
    }

    /// Wait for a slot. Waiters are admitted in arrival order.
    pub async fn acquire(&self) -> Result<RunnerGuard> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("runner pool closed".to_string()))?;
        self.checkout(permit)
    }

    fn checkout(&self, permit: OwnedSemaphorePermit) -> Result<RunnerGuard> {
        let runner = self
            .idle
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Internal("permit granted with no idle runner".to_string()))?;
        trace!("Runner checked out");
        Ok(RunnerGuard {
            runner,
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Get pool statistics
    pub fn stats(&self) -> RunnerPoolStats {
        RunnerPoolStats {
            limit: self.limit,
            active: self.active(),
            idle: self.idle.lock().len(),
        }
    }

    /// Any handle, for metadata queries.
    pub fn peek(&self) -> Option<Arc<dyn ModelRunner>> {
        self.idle.lock().front().cloned()
    }
}

fn check_limit(limit: usize) -> Result<usize> {
    if (1..=MAX_CONCURRENCY).contains(&limit) {
        Ok(limit)
    } else {
        Err(Error::Config(format!(
            "concurrency limit must be between 1 and {}, got {}",
            MAX_CONCURRENCY, limit
        )))
    }
}

/// Guard for automatic runner return to pool
pub struct RunnerGuard {
    runner: Arc<dyn ModelRunner>,
    idle: Idle,
    // Dropped after `drop` runs, i.e. after the runner is back in the queue.
    _permit: OwnedSemaphorePermit,
}

impl RunnerGuard {
    pub fn runner(&self) -> &dyn ModelRunner {
        self.runner.as_ref()
    }
}

impl Drop for RunnerGuard {
    fn drop(&mut self) {
        self.idle.lock().push_back(Arc::clone(&self.runner));
        trace!("Runner returned to pool");
    }
}

/// Runner pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerPoolStats {
    pub limit: usize,
    pub active: usize,
    pub idle: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FragmentStream, GenerationParams, LoadOptions, ModelInfo};
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;

    struct NullRunner;

    #[async_trait]
    impl ModelRunner for NullRunner {
        async fn load(&mut self, _path: &Path, _options: &LoadOptions) -> anyhow::Result<()> {
            Ok(())
        }

        fn generate(&self, _prompt: &str, _params: &GenerationParams) -> FragmentStream {
            Box::pin(futures::stream::empty())
        }

        fn is_loaded(&self) -> bool {
            true
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo::unloaded()
        }
    }

    fn runners(n: usize) -> Vec<Arc<dyn ModelRunner>> {
        (0..n).map(|_| Arc::new(NullRunner) as Arc<dyn ModelRunner>).collect()
    }

    #[test]
    fn test_limit_bounds() {
        assert!(RunnerPool::pooled(runners(0)).is_err());
        assert!(RunnerPool::pooled(runners(9)).is_err());
        assert!(RunnerPool::shared(Arc::new(NullRunner), 0).is_err());
        assert_eq!(RunnerPool::shared(Arc::new(NullRunner), 8).unwrap().limit(), 8);
    }

    #[test]
    fn test_guard_returns_runner() {
        let pool = RunnerPool::pooled(runners(2)).unwrap();
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.stats(), RunnerPoolStats { limit: 2, active: 2, idle: 0 });

        drop(a);
        assert_eq!(pool.stats(), RunnerPoolStats { limit: 2, active: 1, idle: 1 });
        drop(b);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = Arc::new(RunnerPool::shared(Arc::new(NullRunner), 1).unwrap());
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.active(), 0);
    }
}
