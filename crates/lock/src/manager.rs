//! Scoped lock acquisition.
//!
//! [`LockManager::acquire`] returns a [`LockGuard`] that releases on drop, so
//! the lock is let go on every exit path of the critical section: normal
//! return, `?` propagation, or a panic unwinding through it.

use crate::error::Result;
use crate::key::{describe, LockKey};
use crate::quorum::{LockHandle, LockPrimitive};
use geomark_core::config::LockConfig;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Acquires key sets from a [`LockPrimitive`] with jittered retry
#[derive(Clone)]
pub struct LockManager {
    primitive: Arc<dyn LockPrimitive>,
    ttl_ms: u64,
    attempts: u32,
    retry_delay_ms: u64,
    retry_jitter_ms: u64,
}

impl LockManager {
    pub fn new(primitive: Arc<dyn LockPrimitive>, config: &LockConfig) -> Self {
        Self {
            primitive,
            ttl_ms: config.ttl_ms,
            attempts: config.acquire_attempts.max(1),
            retry_delay_ms: config.retry_delay_ms,
            retry_jitter_ms: config.retry_jitter_ms,
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Acquire `keys` (sorted and deduplicated) or fail after the last attempt
    pub async fn acquire(&self, mut keys: Vec<LockKey>) -> Result<LockGuard> {
        keys.sort();
        keys.dedup();

        let mut attempt = 1;
        loop {
            match self.primitive.acquire(&keys, self.ttl_ms) {
                Ok(handle) => {
                    debug!(keys = %describe(&keys), attempt, "Locks acquired");
                    return Ok(LockGuard {
                        primitive: self.primitive.clone(),
                        handle: Some(handle),
                    });
                }
                Err(e) if attempt >= self.attempts => {
                    warn!(keys = %describe(&keys), attempts = attempt, "Giving up on locks");
                    return Err(e);
                }
                Err(e) => {
                    let jitter = if self.retry_jitter_ms > 0 {
                        rand::thread_rng().gen_range(0..=self.retry_jitter_ms)
                    } else {
                        0
                    };
                    let delay = self.retry_delay_ms * attempt as u64 + jitter;
                    debug!(keys = %describe(&keys), attempt, delay_ms = delay, error = %e, "Lock busy, backing off");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run `f` while holding `key`
    pub async fn with_lock<F, Fut>(&self, key: LockKey, f: F) -> Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.with_locks(vec![key], f).await
    }

    /// Run `f` while holding every key in `keys`
    pub async fn with_locks<F, Fut>(&self, keys: Vec<LockKey>, f: F) -> Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let guard = self.acquire(keys).await?;
        let output = f().await;
        drop(guard);
        Ok(output)
    }
}

/// Held lock set; released when dropped
pub struct LockGuard {
    primitive: Arc<dyn LockPrimitive>,
    handle: Option<LockHandle>,
}

impl LockGuard {
    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    pub fn fencing_token(&self, key: &LockKey) -> Option<u64> {
        self.handle.as_ref().and_then(|h| h.fencing_token(key))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // The TTL bounds how long a lost release can block others
            if let Err(e) = self.primitive.release(&handle) {
                warn!(keys = %describe(handle.keys()), error = %e, "Lock release failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QuorumLock;
    use geomark_core::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> (Arc<QuorumLock>, LockManager) {
        let primitive = Arc::new(QuorumLock::in_process(3, Arc::new(SystemClock), 0.01));
        let config = LockConfig {
            retry_delay_ms: 5,
            retry_jitter_ms: 5,
            acquire_attempts: 200,
            ..LockConfig::default()
        };
        (primitive.clone(), LockManager::new(primitive, &config))
    }

    #[tokio::test]
    async fn test_with_lock_releases_after_success_and_error() {
        let (primitive, manager) = manager();
        let key = LockKey::marker("m1");

        let out = manager.with_lock(key.clone(), || async { 7 }).await.unwrap();
        assert_eq!(out, 7);
        assert!(primitive.acquire(&[key.clone()], 1_000).map(|h| primitive.release(&h)).is_ok());

        let failed: std::result::Result<(), &str> = manager
            .with_lock(key.clone(), || async { Err("boom") })
            .await
            .unwrap();
        assert!(failed.is_err());
        assert!(primitive.acquire(&[key], 1_000).is_ok());
    }

    #[tokio::test]
    async fn test_guard_releases_on_panic() {
        let (primitive, manager) = manager();
        let key = LockKey::marker("m2");
        let guard = manager.acquire(vec![key.clone()]).await.unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("critical section failed");
        }));
        assert!(result.is_err());
        assert!(primitive.acquire(&[key], 1_000).is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_collapsed() {
        let (_, manager) = manager();
        let key = LockKey::marker("m3");
        let guard = manager.acquire(vec![key.clone(), key.clone()]).await.unwrap();
        assert_eq!(guard.handle().unwrap().keys().len(), 1);
        assert!(guard.fencing_token(&key).is_some());
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_error() {
        let (primitive, _) = manager();
        let impatient = LockManager::new(
            primitive.clone(),
            &LockConfig {
                acquire_attempts: 2,
                retry_delay_ms: 1,
                retry_jitter_ms: 0,
                ..LockConfig::default()
            },
        );
        let key = LockKey::marker("m4");
        let _held = primitive.acquire(&[key.clone()], 60_000).unwrap();
        assert!(impatient.acquire(vec![key]).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_critical_sections_do_not_overlap() {
        let (_, manager) = manager();
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                tokio::spawn(async move {
                    manager
                        .with_lock(LockKey::marker("shared"), || async {
                            if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await
                        .unwrap();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
