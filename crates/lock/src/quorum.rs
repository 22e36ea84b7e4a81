//! In-process majority-quorum lock primitive.
//!
//! A [`QuorumLock`] fronts N independent [`LockNode`]s. A key set is held when
//! a strict majority of nodes granted every key and the validity window left
//! after acquisition (TTL minus elapsed time minus clock drift) is positive.
//! Every grant carries a fencing token that increases monotonically per node;
//! the handle reports the maximum across granting nodes.

use crate::error::{LockError, Result};
use crate::key::{describe, LockKey};
use geomark_core::Clock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Fixed drift allowance added on top of the proportional one
const DRIFT_FLOOR_MS: u64 = 2;

/// Proof of a held lock set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    keys: Vec<LockKey>,
    owner: String,
    fencing: HashMap<LockKey, u64>,
    valid_until_ms: u64,
}

impl LockHandle {
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Fencing token granted for `key`
    pub fn fencing_token(&self, key: &LockKey) -> Option<u64> {
        self.fencing.get(key).copied()
    }

    /// Time after which the lock may have been reclaimed
    pub fn valid_until_ms(&self) -> u64 {
        self.valid_until_ms
    }
}

/// The distributed lock primitive consumed by [`crate::LockManager`]
pub trait LockPrimitive: Send + Sync {
    /// Acquire every key or none. Fails with [`LockError::NotAcquired`].
    fn acquire(&self, keys: &[LockKey], ttl_ms: u64) -> Result<LockHandle>;

    /// Best-effort release
    fn release(&self, handle: &LockHandle) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Grant {
    owner: String,
    expires_at_ms: u64,
}

/// One simulated lock server
#[derive(Debug)]
pub struct LockNode {
    id: usize,
    available: AtomicBool,
    next_fencing: AtomicU64,
    grants: Mutex<HashMap<LockKey, Grant>>,
}

impl LockNode {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            available: AtomicBool::new(true),
            next_fencing: AtomicU64::new(0),
            grants: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Simulate the node going down or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Grant every key to `owner` or none. Returns the fencing token.
    fn try_grant(&self, keys: &[LockKey], owner: &str, now_ms: u64, ttl_ms: u64) -> Result<Option<u64>> {
        if !self.is_available() {
            return Ok(None);
        }
        let mut grants = self.grants.lock().map_err(|_| LockError::Poisoned(self.id))?;

        let blocked = keys.iter().any(|key| {
            grants
                .get(key)
                .map(|g| g.owner != owner && g.expires_at_ms > now_ms)
                .unwrap_or(false)
        });
        if blocked {
            return Ok(None);
        }

        for key in keys {
            grants.insert(
                key.clone(),
                Grant {
                    owner: owner.to_string(),
                    expires_at_ms: now_ms + ttl_ms,
                },
            );
        }
        Ok(Some(self.next_fencing.fetch_add(1, Ordering::SeqCst) + 1))
    }

    /// Drop the keys still owned by `owner`; returns how many were dropped
    fn revoke(&self, keys: &[LockKey], owner: &str) -> Result<usize> {
        if !self.is_available() {
            return Ok(0);
        }
        let mut grants = self.grants.lock().map_err(|_| LockError::Poisoned(self.id))?;
        let mut dropped = 0;
        for key in keys {
            if grants.get(key).map(|g| g.owner == owner).unwrap_or(false) {
                grants.remove(key);
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}

/// Majority-quorum lock over in-process nodes
pub struct QuorumLock {
    nodes: Vec<Arc<LockNode>>,
    clock: Arc<dyn Clock>,
    drift_factor: f64,
}

impl QuorumLock {
    pub fn new(nodes: Vec<Arc<LockNode>>, clock: Arc<dyn Clock>, drift_factor: f64) -> Self {
        Self {
            nodes,
            clock,
            drift_factor,
        }
    }

    /// Quorum over `count` fresh nodes
    pub fn in_process(count: usize, clock: Arc<dyn Clock>, drift_factor: f64) -> Self {
        let nodes = (0..count).map(|id| Arc::new(LockNode::new(id))).collect();
        Self::new(nodes, clock, drift_factor)
    }

    pub fn node(&self, id: usize) -> Option<&Arc<LockNode>> {
        self.nodes.get(id)
    }

    /// Strict majority of the configured nodes
    pub fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    fn rollback(&self, keys: &[LockKey], owner: &str) {
        for node in &self.nodes {
            if let Err(e) = node.revoke(keys, owner) {
                warn!(node = node.id(), error = %e, "Lock rollback failed on node");
            }
        }
    }
}

impl LockPrimitive for QuorumLock {
    fn acquire(&self, keys: &[LockKey], ttl_ms: u64) -> Result<LockHandle> {
        if keys.is_empty() {
            return Err(LockError::NoKeys);
        }

        let mut owner_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut owner_bytes);
        let owner = hex::encode(owner_bytes);

        let started_ms = self.clock.now_ms();
        let mut granted = 0;
        let mut fencing_max = 0;
        for node in &self.nodes {
            match node.try_grant(keys, &owner, started_ms, ttl_ms) {
                Ok(Some(token)) => {
                    granted += 1;
                    fencing_max = fencing_max.max(token);
                }
                Ok(None) => {}
                Err(e) => warn!(node = node.id(), error = %e, "Lock node failed during acquire"),
            }
        }

        let now_ms = self.clock.now_ms();
        let elapsed = now_ms.saturating_sub(started_ms);
        let drift = (ttl_ms as f64 * self.drift_factor) as u64 + DRIFT_FLOOR_MS;
        let validity = ttl_ms as i64 - elapsed as i64 - drift as i64;

        if granted < self.quorum() || validity <= 0 {
            self.rollback(keys, &owner);
            debug!(keys = %describe(keys), granted, validity, "Lock quorum not reached");
            return Err(LockError::NotAcquired {
                keys: describe(keys),
                granted,
                required: self.quorum(),
            });
        }

        Ok(LockHandle {
            keys: keys.to_vec(),
            fencing: keys.iter().map(|k| (k.clone(), fencing_max)).collect(),
            owner,
            valid_until_ms: now_ms + validity as u64,
        })
    }

    fn release(&self, handle: &LockHandle) -> Result<()> {
        let mut dropped = 0;
        for node in &self.nodes {
            dropped += node.revoke(&handle.keys, &handle.owner)?;
        }
        if dropped == 0 {
            return Err(LockError::NotHeld {
                owner: handle.owner.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomark_core::ManualClock;

    fn setup() -> (Arc<ManualClock>, QuorumLock) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let lock = QuorumLock::in_process(3, clock.clone(), 0.01);
        (clock, lock)
    }

    fn key(s: &str) -> LockKey {
        LockKey::marker(s)
    }

    #[test]
    fn test_exclusive_acquire() {
        let (_, lock) = setup();
        let handle = lock.acquire(&[key("a")], 5_000).unwrap();
        assert!(matches!(
            lock.acquire(&[key("a")], 5_000),
            Err(LockError::NotAcquired { granted: 0, .. })
        ));
        // Disjoint keys proceed
        assert!(lock.acquire(&[key("b")], 5_000).is_ok());

        lock.release(&handle).unwrap();
        assert!(lock.acquire(&[key("a")], 5_000).is_ok());
    }

    #[test]
    fn test_multi_key_is_all_or_nothing() {
        let (_, lock) = setup();
        let _held = lock.acquire(&[key("b")], 5_000).unwrap();
        assert!(lock.acquire(&[key("a"), key("b")], 5_000).is_err());
        // The failed attempt must not leave "a" behind
        assert!(lock.acquire(&[key("a")], 5_000).is_ok());
    }

    #[test]
    fn test_expired_lock_is_reclaimed_with_higher_fencing_token() {
        let (clock, lock) = setup();
        let first = lock.acquire(&[key("a")], 1_000).unwrap();
        clock.advance_ms(1_001);

        let second = lock.acquire(&[key("a")], 1_000).unwrap();
        assert!(second.fencing_token(&key("a")) > first.fencing_token(&key("a")));

        // The stale holder's release finds nothing of its own
        assert!(matches!(lock.release(&first), Err(LockError::NotHeld { .. })));
        assert!(lock.acquire(&[key("a")], 1_000).is_err());
    }

    #[test]
    fn test_minority_outage_keeps_quorum() {
        let (_, lock) = setup();
        lock.node(0).unwrap().set_available(false);
        assert!(lock.acquire(&[key("a")], 5_000).is_ok());
    }

    #[test]
    fn test_majority_outage_loses_quorum_and_rolls_back() {
        let (_, lock) = setup();
        lock.node(0).unwrap().set_available(false);
        lock.node(1).unwrap().set_available(false);
        assert!(matches!(
            lock.acquire(&[key("a")], 5_000),
            Err(LockError::NotAcquired {
                granted: 1,
                required: 2,
                ..
            })
        ));

        lock.node(0).unwrap().set_available(true);
        lock.node(1).unwrap().set_available(true);
        assert!(lock.acquire(&[key("a")], 5_000).is_ok());
    }

    #[test]
    fn test_ttl_shorter_than_drift_is_rejected() {
        let (_, lock) = setup();
        assert!(lock.acquire(&[key("a")], 1).is_err());
        assert!(lock.acquire(&[key("a")], 5_000).is_ok());
    }

    #[test]
    fn test_empty_key_set() {
        let (_, lock) = setup();
        assert!(matches!(lock.acquire(&[], 5_000), Err(LockError::NoKeys)));
    }
}
