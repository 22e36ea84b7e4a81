//! Credibility engine: record lookup, update and gating for one actor.

use crate::behaviour::Behaviour;
use crate::error::Result;
use crate::score::score;
use crate::store::{CredibilityRecord, CredibilityStore};
use crate::throttle::{Throttle, ThrottlePolicy};
use geomark_core::config::CredibilityConfig;
use geomark_core::{ActorId, Fingerprinter};
use std::sync::Arc;
use tracing::debug;

pub struct CredibilityEngine {
    store: Arc<CredibilityStore>,
    fingerprinter: Fingerprinter,
    throttle: ThrottlePolicy,
}

impl CredibilityEngine {
    pub fn new(
        store: Arc<CredibilityStore>,
        fingerprinter: Fingerprinter,
        config: &CredibilityConfig,
    ) -> Self {
        Self {
            store,
            fingerprinter,
            throttle: ThrottlePolicy::new(config),
        }
    }

    pub fn fingerprint(&self, actor: &ActorId) -> String {
        self.fingerprinter.fingerprint(actor)
    }

    pub fn throttle(&self) -> &ThrottlePolicy {
        &self.throttle
    }

    /// Stored record, or a fresh one scored for an identity first seen now
    pub fn record_for(&self, actor: &ActorId, now_ms: u64) -> Result<CredibilityRecord> {
        let fingerprint = self.fingerprint(actor);
        match self.store.get(&fingerprint)? {
            Some(record) => Ok(record),
            None => Ok(fresh_record(fingerprint, now_ms)),
        }
    }

    pub fn rating(&self, actor: &ActorId, now_ms: u64) -> Result<u8> {
        Ok(self.record_for(actor, now_ms)?.rating)
    }

    /// Apply `observe` to the actor's behaviour, rescore and persist.
    ///
    /// The whole read-modify-write runs in one store transaction, so
    /// concurrent updates for the same actor all land.
    pub fn update(
        &self,
        actor: &ActorId,
        now_ms: u64,
        observe: impl FnOnce(&mut Behaviour),
    ) -> Result<CredibilityRecord> {
        let fingerprint = self.fingerprint(actor);
        let mut previous = None;
        let record = self.store.modify(&fingerprint, now_ms, |existing| {
            let mut record = existing.unwrap_or_else(|| fresh_record(fingerprint.clone(), now_ms));
            previous = Some(record.rating);
            observe(&mut record.behaviour);
            record.rating = score(&record.behaviour, now_ms);
            record
        })?;
        debug!(
            actor = %record.fingerprint,
            previous = ?previous,
            rating = record.rating,
            "Credibility updated"
        );
        Ok(record)
    }

    /// Overwrite an actor's record
    pub fn seed(&self, actor: &ActorId, rating: u8, behaviour: Behaviour, now_ms: u64) -> Result<()> {
        self.store.put(
            &CredibilityRecord {
                fingerprint: self.fingerprint(actor),
                rating: rating.min(100),
                behaviour,
            },
            now_ms,
        )
    }

    pub fn check_registration(&self, record: &CredibilityRecord, now_ms: u64) -> Throttle {
        self.throttle
            .check(&record.behaviour.registration, record.rating, now_ms)
    }

    pub fn check_alteration(&self, record: &CredibilityRecord, now_ms: u64) -> Throttle {
        self.throttle
            .check_alteration(&record.behaviour.alteration, record.rating, now_ms)
    }

    /// Delete everything known about the actor
    pub fn erase(&self, actor: &ActorId) -> Result<bool> {
        self.store.delete(&self.fingerprint(actor))
    }
}

/// Record for an identity first seen at `now_ms`
fn fresh_record(fingerprint: String, now_ms: u64) -> CredibilityRecord {
    let behaviour = Behaviour::new(now_ms);
    CredibilityRecord {
        rating: score(&behaviour, now_ms),
        fingerprint,
        behaviour,
    }
}
