//! Distributed geospatial locking for Geomark.
//!
//! Command handlers serialise conflicting mutations by locking geohash cells
//! (same-area registration) and aggregate ids (concurrent edits of one
//! marker). Locks carry a short TTL; the event store's version check remains
//! the last line against a lock lost to expiry.

pub mod error;
pub mod key;
pub mod manager;
pub mod quorum;

pub use error::{LockError, Result};
pub use key::LockKey;
pub use manager::{LockGuard, LockManager};
pub use quorum::{LockHandle, LockNode, LockPrimitive, QuorumLock};
