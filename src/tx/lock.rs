//! Process-wide gate around reserve -> sign -> broadcast -> commit

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

/// Single mutual-exclusion gate; waiters are served in FIFO order
#[derive(Default)]
pub struct DispatchLock {
    mutex: Arc<Mutex<()>>,
}

impl DispatchLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend until the previous holder releases
    pub async fn acquire(&self, correlation_id: &str) -> DispatchPermit {
        info!(correlation_id, "Try to acquire lock");
        let started = Instant::now();
        let guard = self.mutex.clone().lock_owned().await;
        crate::metrics::record_lock_wait(started.elapsed().as_secs_f64());
        info!(correlation_id, "Lock acquired");

        DispatchPermit {
            guard: Some(guard),
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// Held for the critical section; released explicitly or on drop, at most once
pub struct DispatchPermit {
    guard: Option<OwnedMutexGuard<()>>,
    correlation_id: String,
}

impl DispatchPermit {
    pub fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            info!(correlation_id = %self.correlation_id, "Lock released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_none()
    }
}

impl Drop for DispatchPermit {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let lock = DispatchLock::new();
        let mut permit = lock.acquire("a").await;
        assert!(!permit.is_released());
        permit.release();
        permit.release();
        assert!(permit.is_released());

        // Reacquirable after an explicit release
        let second = lock.acquire("b").await;
        assert!(!second.is_released());
    }

    #[tokio::test]
    async fn test_drop_releases_on_error_paths() {
        let lock = DispatchLock::new();
        {
            let _permit = lock.acquire("a").await;
        }
        tokio::time::timeout(Duration::from_secs(1), lock.acquire("b"))
            .await
            .expect("lock should be free after drop");
    }

    #[tokio::test]
    async fn test_holders_never_overlap() {
        let lock = Arc::new(DispatchLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let lock = lock.clone();
                let inside = inside.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _permit = lock.acquire(&format!("task-{i}")).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
