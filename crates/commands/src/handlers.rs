//! Command handlers.
//!
//! Each handler acquires its locks, then runs load -> validate -> mutate ->
//! save under [`retry_on_conflict`]. Locks are released by the guard on every
//! exit path. Behaviour statistics are updated only after a successful save.

use crate::command::{Command, ImportItem, ImportOutcome, Outcome, Register, Report, Reposition, Vote};
use crate::context::CommandContext;
use crate::error::{CommandError, Result};
use crate::retry::retry_on_conflict;
use geomark_core::{ActorId, Coordinate};
use geomark_credibility::Behaviour;
use geomark_domain::{Marker, MarkerId, SyncFields};
use geomark_lock::LockKey;
use geomark_store::{VoteDirection, CREDIBILITY_TOPIC};
use serde_json::json;
use tracing::{debug, error, info, warn};

fn coordinate(longitude: f64, latitude: f64) -> Result<Coordinate> {
    Coordinate::new(longitude, latitude).map_err(|e| CommandError::InvalidInput(e.to_string()))
}

impl CommandContext {
    pub async fn execute(&self, command: Command) -> Result<Outcome> {
        match command {
            Command::Register(cmd) => self.register(cmd).await,
            Command::Upvote(cmd) => self.vote(cmd, VoteDirection::Up).await,
            Command::Downvote(cmd) => self.vote(cmd, VoteDirection::Down).await,
            Command::Reposition(cmd) => self.reposition(cmd).await,
            Command::Report(cmd) => self.report(cmd).await,
            Command::Remove { marker_id } => self.remove(marker_id).await,
            Command::Restore { marker_id } => self.restore(marker_id).await,
            Command::Import { items } => self.import(items).await,
            Command::Synchronize { marker_id, fields } => self.synchronize(marker_id, fields).await,
            Command::PurgeMarked { older_than_ms } => self.purge_marked(older_than_ms).await,
            Command::Erase { actor } => self.erase(&actor),
        }
    }

    pub async fn register(&self, cmd: Register) -> Result<Outcome> {
        let position = coordinate(cmd.longitude, cmd.latitude)?;
        let keys = self.area_keys(&position);
        debug!(cells = keys.len(), actor = %self.credibility.fingerprint(&cmd.actor), "Register");

        self.locks
            .with_locks(keys, || async {
                retry_on_conflict(self.conflict_retries, || {
                    self.register_locked(&cmd.actor, position)
                })
            })
            .await?
    }

    fn register_locked(&self, actor: &ActorId, position: Coordinate) -> Result<Outcome> {
        let nearby = self
            .repository
            .read_model()
            .query_nearby(&position, self.markers.same_marker_radius_m)?;
        if let Some(existing) = nearby.first() {
            info!(
                marker_id = %existing.document.id,
                distance_m = existing.distance_m,
                "Registration matches an existing marker, counting it as an upvote"
            );
            return self.vote_locked(existing.document.id, actor, position, VoteDirection::Up);
        }

        let now = self.now_ms();
        let record = self.credibility.record_for(actor, now)?;
        let throttle = self.credibility.check_registration(&record, now);
        if !throttle.is_allowed() {
            info!(actor = %record.fingerprint, rating = record.rating, ?throttle, "Registration throttled");
            return Err(CommandError::Throttled(throttle));
        }

        let mut marker = Marker::register(position, actor.clone());
        self.repository.save(&mut marker)?;

        self.observe(actor, now, |b| {
            b.record_interaction(now, position);
            b.record_registration(now);
        });
        Ok(Outcome::Registered {
            marker_id: marker.id(),
        })
    }

    pub async fn vote(&self, cmd: Vote, direction: VoteDirection) -> Result<Outcome> {
        let position = coordinate(cmd.longitude, cmd.latitude)?;
        debug!(marker_id = %cmd.marker_id, ?direction, "Vote");

        self.locks
            .with_lock(LockKey::marker(cmd.marker_id), || async {
                retry_on_conflict(self.conflict_retries, || {
                    self.vote_locked(cmd.marker_id, &cmd.actor, position, direction)
                })
            })
            .await?
    }

    fn vote_locked(
        &self,
        id: MarkerId,
        actor: &ActorId,
        actor_position: Coordinate,
        direction: VoteDirection,
    ) -> Result<Outcome> {
        let mut marker = self.load_active(id)?;
        self.ensure_reach(&actor_position, &marker.position())?;

        let now = self.now_ms();
        let fingerprint = self.credibility.fingerprint(actor);
        if let Some(last) = self.repository.votes().last_vote(id, &fingerprint)? {
            let cooldown_ms = self.markers.vote_cooldown_secs * 1_000;
            if now.saturating_sub(last.at) < cooldown_ms {
                info!(marker_id = %id, actor = %fingerprint, "Repeat vote inside cooldown ignored");
                return Ok(Outcome::VoteIgnored { marker_id: id });
            }
        }

        let rating = self.credibility.rating(actor, now)?;
        let threshold = self.markers.deletion_score_threshold;
        let before = marker.score();
        let delta = match direction {
            VoteDirection::Up => marker.upvote(actor.clone(), rating, &self.policy)?,
            VoteDirection::Down => marker.downvote(actor.clone(), rating, &self.policy)?,
        };

        if marker.score() <= threshold {
            if direction == VoteDirection::Down && marker.mark_for_deletion(now)? {
                info!(marker_id = %id, score = marker.score(), "Marker marked for deletion by score");
            }
        } else if before <= threshold && marker.clear_deletion_mark()? {
            info!(marker_id = %id, score = marker.score(), "Deletion mark cleared");
        }

        self.repository.save(&mut marker)?;

        self.observe(actor, now, |b| {
            b.record_interaction(now, actor_position);
            b.record_vote(now, direction == VoteDirection::Up);
        });
        Ok(Outcome::Voted {
            marker_id: id,
            delta,
            score: marker.score(),
        })
    }

    pub async fn reposition(&self, cmd: Reposition) -> Result<Outcome> {
        let target = coordinate(cmd.longitude, cmd.latitude)?;
        let editor = coordinate(cmd.editor_longitude, cmd.editor_latitude)?;
        let mut keys = self.area_keys(&target);
        keys.push(LockKey::marker(cmd.marker_id));
        debug!(marker_id = %cmd.marker_id, "Reposition");

        self.locks
            .with_locks(keys, || async {
                retry_on_conflict(self.conflict_retries, || {
                    self.reposition_locked(cmd.marker_id, &cmd.actor, editor, target)
                })
            })
            .await?
    }

    fn reposition_locked(
        &self,
        id: MarkerId,
        actor: &ActorId,
        editor: Coordinate,
        target: Coordinate,
    ) -> Result<Outcome> {
        let mut marker = self.load_active(id)?;
        self.ensure_reach(&editor, &target)?;

        let drift = marker.position().haversine_distance(&target);
        if drift > self.markers.max_reposition_m {
            return Err(CommandError::AlterationConflict(format!(
                "drift of {:.1}m exceeds {:.1}m",
                drift, self.markers.max_reposition_m
            )));
        }
        let occupied = self
            .repository
            .read_model()
            .query_nearby(&target, self.markers.same_marker_radius_m)?
            .into_iter()
            .any(|n| n.document.id != id);
        if occupied {
            return Err(CommandError::AlterationConflict(
                "destination already holds a marker".to_string(),
            ));
        }

        let now = self.now_ms();
        let record = self.credibility.record_for(actor, now)?;
        let throttle = self.credibility.check_alteration(&record, now);
        if !throttle.is_allowed() {
            info!(actor = %record.fingerprint, rating = record.rating, ?throttle, "Reposition throttled");
            return Err(CommandError::Throttled(throttle));
        }

        marker.reposition(actor.clone(), record.rating, target)?;
        self.repository.save(&mut marker)?;

        self.observe(actor, now, |b| {
            b.record_interaction(now, editor);
            b.record_alteration(now);
        });
        Ok(Outcome::Repositioned { marker_id: id })
    }

    pub async fn report(&self, cmd: Report) -> Result<Outcome> {
        let position = coordinate(cmd.longitude, cmd.latitude)?;
        debug!(marker_id = %cmd.marker_id, category = ?cmd.category, "Report");

        self.locks
            .with_lock(LockKey::marker(cmd.marker_id), || async {
                retry_on_conflict(self.conflict_retries, || {
                    let mut marker = self.load_active(cmd.marker_id)?;
                    self.ensure_reach(&position, &marker.position())?;

                    let now = self.now_ms();
                    marker.report(cmd.actor.clone(), cmd.category, now)?;
                    if marker.distinct_reporters(cmd.category) >= self.markers.report_threshold
                        && marker.mark_for_deletion(now)?
                    {
                        info!(marker_id = %cmd.marker_id, category = ?cmd.category, "Marker marked for deletion by reports");
                    }
                    self.repository.save(&mut marker)?;

                    self.observe(&cmd.actor, now, |b| b.record_interaction(now, position));
                    Ok(Outcome::Reported {
                        marker_id: cmd.marker_id,
                        marked_for_deletion: marker.marked_for_deletion_at().is_some(),
                    })
                })
            })
            .await?
    }

    pub async fn remove(&self, id: MarkerId) -> Result<Outcome> {
        debug!(marker_id = %id, "Remove");
        self.locks
            .with_lock(LockKey::marker(id), || async {
                retry_on_conflict(self.conflict_retries, || self.remove_locked(id))
            })
            .await?
    }

    fn remove_locked(&self, id: MarkerId) -> Result<Outcome> {
        let mut marker = self.load_active(id)?;
        marker.remove()?;
        self.repository.save(&mut marker)?;
        info!(marker_id = %id, version = marker.version(), "Marker removed");
        Ok(Outcome::Removed { marker_id: id })
    }

    pub async fn restore(&self, id: MarkerId) -> Result<Outcome> {
        debug!(marker_id = %id, "Restore");
        // A removed marker is immutable, so its position is stable before locking
        let original = self
            .repository
            .load(id)?
            .ok_or(CommandError::NotFound(id))?;
        let mut keys = self.area_keys(&original.position());
        keys.push(LockKey::marker(id));

        self.locks
            .with_locks(keys, || async {
                retry_on_conflict(self.conflict_retries, || {
                    let original = self
                        .repository
                        .load(id)?
                        .ok_or(CommandError::NotFound(id))?;
                    if !original.is_removed() {
                        return Err(CommandError::AlterationConflict(format!(
                            "marker {} is still active",
                            id
                        )));
                    }
                    let occupied = !self
                        .repository
                        .read_model()
                        .query_nearby(&original.position(), self.markers.same_marker_radius_m)?
                        .is_empty();
                    if occupied {
                        return Err(CommandError::AlterationConflict(
                            "position already holds a marker".to_string(),
                        ));
                    }

                    let mut restored = Marker::restore(&original)?;
                    self.repository.save(&mut restored)?;
                    info!(marker_id = %restored.id(), restored_from = %id, "Marker restored");
                    Ok(Outcome::Restored {
                        marker_id: restored.id(),
                        restored_from: id,
                    })
                })
            })
            .await?
    }

    pub async fn import(&self, items: Vec<ImportItem>) -> Result<Outcome> {
        debug!(items = items.len(), "Import");
        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            let outcome = match self.import_item(&item).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(longitude = item.longitude, latitude = item.latitude, error = %e, "Import item failed");
                    ImportOutcome::Failed {
                        error: e.to_public(),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(Outcome::Imported { items: outcomes })
    }

    async fn import_item(&self, item: &ImportItem) -> Result<ImportOutcome> {
        let position = coordinate(item.longitude, item.latitude)?;
        self.locks
            .with_locks(self.area_keys(&position), || async {
                retry_on_conflict(self.conflict_retries, || {
                    let nearby = self
                        .repository
                        .read_model()
                        .query_nearby(&position, self.markers.same_marker_radius_m)?;
                    match nearby.first() {
                        Some(existing) => {
                            let id = existing.document.id;
                            let mut marker = self.load_active(id)?;
                            marker.synchronize(
                                SyncFields {
                                    longitude: Some(position.longitude),
                                    latitude: Some(position.latitude),
                                    score: item.score,
                                },
                                &self.policy,
                            )?;
                            self.repository.save(&mut marker)?;
                            Ok(ImportOutcome::Synchronized { marker_id: id })
                        }
                        None => {
                            let score = item.score.map(|s| self.policy.clamp(s));
                            let mut marker = Marker::import(position, score);
                            self.repository.save(&mut marker)?;
                            Ok(ImportOutcome::Created {
                                marker_id: marker.id(),
                            })
                        }
                    }
                })
            })
            .await?
    }

    pub async fn synchronize(&self, id: MarkerId, fields: SyncFields) -> Result<Outcome> {
        debug!(marker_id = %id, "Synchronize");
        let mut keys = vec![LockKey::marker(id)];
        let destination = if fields.longitude.is_some() || fields.latitude.is_some() {
            let current = self.load_active(id)?.position();
            let destination = coordinate(
                fields.longitude.unwrap_or(current.longitude),
                fields.latitude.unwrap_or(current.latitude),
            )?;
            keys.extend(self.area_keys(&destination));
            Some(destination)
        } else {
            None
        };

        self.locks
            .with_locks(keys, || async {
                retry_on_conflict(self.conflict_retries, || {
                    let mut marker = self.load_active(id)?;
                    if fields.is_empty() {
                        return Ok(Outcome::Synchronized { marker_id: id });
                    }
                    if let Some(locked) = destination {
                        // Only the given axis is replaced, so a concurrent
                        // move can shift the destination out of the locked cells
                        let current = marker.position();
                        let now_at = coordinate(
                            fields.longitude.unwrap_or(current.longitude),
                            fields.latitude.unwrap_or(current.latitude),
                        )?;
                        if now_at != locked {
                            return Err(CommandError::AlterationConflict(
                                "marker moved while synchronizing".to_string(),
                            ));
                        }
                    }
                    marker.synchronize(fields, &self.policy)?;
                    self.repository.save(&mut marker)?;
                    Ok(Outcome::Synchronized { marker_id: id })
                })
            })
            .await?
    }

    /// Remove every marker whose deletion mark is older than `older_than_ms`
    pub async fn purge_marked(&self, older_than_ms: u64) -> Result<Outcome> {
        let cutoff = self.now_ms().saturating_sub(older_than_ms);
        let candidates = self.repository.read_model().marked_before(cutoff)?;
        debug!(candidates = candidates.len(), cutoff, "Purge marked markers");

        let mut removed = Vec::new();
        for id in candidates {
            let result = self
                .locks
                .with_lock(LockKey::marker(id), || async {
                    retry_on_conflict(self.conflict_retries, || {
                        let marker = self.load_active(id)?;
                        // The mark may have been cleared since the query
                        match marker.marked_for_deletion_at() {
                            Some(at) if at <= cutoff => self.remove_locked(id).map(Some),
                            _ => Ok(None),
                        }
                    })
                })
                .await;

            match result {
                Ok(Ok(Some(_))) => removed.push(id),
                Ok(Ok(None)) | Ok(Err(CommandError::NotFound(_))) => {}
                Ok(Err(e)) => warn!(marker_id = %id, error = %e, "Purge skipped marker"),
                Err(e) => warn!(marker_id = %id, error = %e, "Purge could not lock marker"),
            }
        }

        info!(removed = removed.len(), "Purge finished");
        Ok(Outcome::Purged { removed })
    }

    /// Forget an actor: PII tokens, vote rows and credibility record
    pub fn erase(&self, actor: &ActorId) -> Result<Outcome> {
        let fingerprint = self.credibility.fingerprint(actor);
        let report = self.repository.erase_actor(actor)?;
        let credibility_deleted = self.credibility.erase(actor)?;
        info!(
            actor = %fingerprint,
            tokens = report.tokens_deleted,
            votes = report.votes_deleted,
            "Actor erased"
        );
        Ok(Outcome::Erased {
            tokens_deleted: report.tokens_deleted,
            votes_deleted: report.votes_deleted,
            credibility_deleted,
        })
    }

    /// Area keys covering every cell a same-marker match around `position`
    /// could live in
    fn area_keys(&self, position: &Coordinate) -> Vec<LockKey> {
        LockKey::areas_around(
            position,
            self.markers.same_marker_radius_m,
            self.geohash_precision,
        )
    }

    fn load_active(&self, id: MarkerId) -> Result<Marker> {
        match self.repository.load(id)? {
            Some(marker) if !marker.is_removed() => Ok(marker),
            _ => Err(CommandError::NotFound(id)),
        }
    }

    fn ensure_reach(&self, actor: &Coordinate, target: &Coordinate) -> Result<()> {
        let distance_m = actor.haversine_distance(target);
        if distance_m > self.markers.reach_radius_m {
            return Err(CommandError::OutOfReach {
                distance_m,
                limit_m: self.markers.reach_radius_m,
            });
        }
        Ok(())
    }

    /// Update behaviour after a committed mutation. Failures are logged:
    /// the mutation itself is already durable.
    fn observe(&self, actor: &ActorId, now: u64, f: impl FnOnce(&mut Behaviour)) {
        match self.credibility.update(actor, now, f) {
            Ok(record) => {
                let payload = json!({ "actor": record.fingerprint, "rating": record.rating });
                if let Err(e) = self.queue.enqueue(CREDIBILITY_TOPIC, payload) {
                    warn!(error = %e, "Credibility recomputation not enqueued");
                }
            }
            Err(e) => error!(
                actor = %self.credibility.fingerprint(actor),
                error = %e,
                "Credibility update failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Register;
    use crate::context::Backends;
    use geomark_core::{GeomarkConfig, ManualClock};
    use geomark_credibility::{CredibilityStore, Throttle};
    use geomark_domain::ReportCategory;
    use geomark_lock::QuorumLock;
    use geomark_pseudonym::PiiVault;
    use geomark_store::{Database, RecordingQueue};
    use std::sync::Arc;

    const LON: f64 = 8.40395;
    const LAT: f64 = 49.0092;
    // ~28m of latitude: outside the same-marker radius, inside reach
    const NEAR: f64 = 0.00025;

    struct Harness {
        ctx: CommandContext,
        clock: Arc<ManualClock>,
        queue: Arc<RecordingQueue>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let queue = Arc::new(RecordingQueue::new());
        let ctx = CommandContext::in_memory(&GeomarkConfig::default(), clock.clone(), queue.clone())
            .unwrap();
        Harness { ctx, clock, queue }
    }

    fn actor(name: &str) -> ActorId {
        ActorId::new(name)
    }

    async fn register(h: &Harness, name: &str, lon: f64, lat: f64) -> MarkerId {
        let outcome = h
            .ctx
            .register(Register {
                longitude: lon,
                latitude: lat,
                actor: actor(name),
            })
            .await
            .unwrap();
        match outcome {
            Outcome::Registered { marker_id } => marker_id,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn vote(id: MarkerId, name: &str, lat: f64) -> Vote {
        Vote {
            marker_id: id,
            longitude: LON,
            latitude: lat,
            actor: actor(name),
        }
    }

    #[tokio::test]
    async fn test_register_creates_marker() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        let doc = h.ctx.marker(id).unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.score, 0);
        assert!(!doc.imported);

        let updates = h.queue.on_topic(CREDIBILITY_TOPIC);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0]["actor"], h.ctx.credibility().fingerprint(&actor("a")));
    }

    #[tokio::test]
    async fn test_register_near_existing_counts_as_upvote() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        let outcome = h
            .ctx
            .register(Register {
                longitude: LON,
                latitude: LAT + 0.00004,
                actor: actor("b"),
            })
            .await
            .unwrap();

        // Fresh identities rate 60, which weighs 3
        assert_eq!(
            outcome,
            Outcome::Voted {
                marker_id: id,
                delta: 3,
                score: 3
            }
        );
        assert_eq!(h.ctx.markers_near(&Coordinate::new(LON, LAT).unwrap(), 50.0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_registration_cooldown_throttles() {
        let h = harness();
        register(&h, "a", LON, LAT).await;

        let err = h
            .ctx
            .register(Register {
                longitude: LON,
                latitude: LAT + 0.01,
                actor: actor("a"),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Throttled(Throttle::Cooldown { .. })
        ));

        h.clock.advance_secs(600);
        register(&h, "a", LON, LAT + 0.01).await;
    }

    #[tokio::test]
    async fn test_invalid_coordinate_is_rejected() {
        let h = harness();
        let err = h
            .ctx
            .register(Register {
                longitude: 200.0,
                latitude: LAT,
                actor: actor("a"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_vote_out_of_reach() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        let err = h
            .ctx
            .vote(vote(id, "b", LAT + 0.01), VoteDirection::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::OutOfReach { .. }));
        assert_eq!(h.ctx.marker(id).unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_vote_on_unknown_marker() {
        let h = harness();
        let err = h
            .ctx
            .vote(vote(MarkerId::new(), "b", LAT), VoteDirection::Up)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_repeat_vote_inside_cooldown_is_ignored() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        let first = h.ctx.vote(vote(id, "b", LAT + NEAR), VoteDirection::Up).await.unwrap();
        assert!(matches!(first, Outcome::Voted { .. }));

        let repeat = h.ctx.vote(vote(id, "b", LAT + NEAR), VoteDirection::Down).await.unwrap();
        assert_eq!(repeat, Outcome::VoteIgnored { marker_id: id });
        assert_eq!(h.ctx.marker(id).unwrap().unwrap().version, 2);

        h.clock.advance_secs(24 * 3600 + 1);
        let later = h.ctx.vote(vote(id, "b", LAT + NEAR), VoteDirection::Down).await.unwrap();
        assert!(matches!(later, Outcome::Voted { delta, .. } if delta < 0));
        assert_eq!(h.ctx.repository().votes().count_for_marker(id).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_score_threshold_marks_and_clears() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        h.ctx.vote(vote(id, "b", LAT), VoteDirection::Down).await.unwrap();
        h.ctx.vote(vote(id, "c", LAT), VoteDirection::Down).await.unwrap();
        let doc = h.ctx.marker(id).unwrap().unwrap();
        assert_eq!(doc.score, -6);
        assert!(doc.marked_for_deletion_at.is_some());

        let now = h.ctx.now_ms();
        h.ctx
            .credibility()
            .seed(&actor("d"), 80, Behaviour::new(now), now)
            .unwrap();
        let outcome = h.ctx.vote(vote(id, "d", LAT), VoteDirection::Up).await.unwrap();
        assert!(matches!(outcome, Outcome::Voted { delta: 4, score: -2, .. }));
        assert!(h.ctx.marker(id).unwrap().unwrap().marked_for_deletion_at.is_none());
    }

    #[tokio::test]
    async fn test_reports_mark_for_deletion() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        let mut last = None;
        for name in ["r1", "r2", "r2", "r3"] {
            last = Some(
                h.ctx
                    .report(Report {
                        marker_id: id,
                        longitude: LON,
                        latitude: LAT,
                        actor: actor(name),
                        category: ReportCategory::Nonexistent,
                    })
                    .await
                    .unwrap(),
            );
            if name == "r2" {
                assert!(h.ctx.marker(id).unwrap().unwrap().marked_for_deletion_at.is_none());
            }
        }
        assert_eq!(
            last,
            Some(Outcome::Reported {
                marker_id: id,
                marked_for_deletion: true
            })
        );
    }

    #[tokio::test]
    async fn test_reposition_rules() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;
        let blocker = register(&h, "z", LON, LAT + NEAR).await;

        let reposition = |lat: f64| Reposition {
            marker_id: id,
            longitude: LON,
            latitude: lat,
            editor_longitude: LON,
            editor_latitude: lat,
            actor: actor("e"),
        };

        let err = h.ctx.reposition(reposition(LAT + 0.001)).await.unwrap_err();
        assert!(matches!(err, CommandError::AlterationConflict(_)));

        let err = h.ctx.reposition(reposition(LAT + NEAR)).await.unwrap_err();
        assert!(matches!(err, CommandError::AlterationConflict(_)));
        assert_eq!(h.ctx.marker(blocker).unwrap().unwrap().version, 1);

        let outcome = h.ctx.reposition(reposition(LAT - 0.0002)).await.unwrap();
        assert_eq!(outcome, Outcome::Repositioned { marker_id: id });
        let doc = h.ctx.marker(id).unwrap().unwrap();
        assert!((doc.position.latitude - (LAT - 0.0002)).abs() < 1e-9);
        assert_eq!(doc.version, 2);
    }

    #[tokio::test]
    async fn test_remove_and_restore() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        let err = h.ctx.restore(id).await.unwrap_err();
        assert!(matches!(err, CommandError::AlterationConflict(_)));

        assert_eq!(h.ctx.remove(id).await.unwrap(), Outcome::Removed { marker_id: id });
        assert!(h.ctx.marker(id).unwrap().is_none());
        let err = h.ctx.vote(vote(id, "b", LAT), VoteDirection::Up).await.unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));

        let restored = match h.ctx.restore(id).await.unwrap() {
            Outcome::Restored {
                marker_id,
                restored_from,
            } => {
                assert_eq!(restored_from, id);
                marker_id
            }
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_ne!(restored, id);
        assert_eq!(h.ctx.marker(restored).unwrap().unwrap().restored_from, Some(id));

        // The spot is occupied again
        let err = h.ctx.restore(id).await.unwrap_err();
        assert!(matches!(err, CommandError::AlterationConflict(_)));
    }

    #[tokio::test]
    async fn test_import_creates_then_synchronizes() {
        let h = harness();
        let outcome = h
            .ctx
            .import(vec![
                ImportItem {
                    longitude: LON,
                    latitude: LAT,
                    score: Some(7),
                },
                ImportItem {
                    longitude: LON,
                    latitude: 95.0,
                    score: None,
                },
            ])
            .await
            .unwrap();
        let Outcome::Imported { items } = outcome else {
            panic!("unexpected outcome");
        };
        let ImportOutcome::Created { marker_id } = items[0].clone() else {
            panic!("first item should be created");
        };
        assert!(matches!(&items[1], ImportOutcome::Failed { error } if error.code == "INVALID_INPUT"));

        let doc = h.ctx.marker(marker_id).unwrap().unwrap();
        assert!(doc.imported);
        assert_eq!(doc.score, 7);

        let outcome = h
            .ctx
            .import(vec![ImportItem {
                longitude: LON,
                latitude: LAT + 0.00002,
                score: Some(1_000_000),
            }])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Imported {
                items: vec![ImportOutcome::Synchronized { marker_id }]
            }
        );
        assert_eq!(h.ctx.marker(marker_id).unwrap().unwrap().score, 1_000);
    }

    #[tokio::test]
    async fn test_synchronize_rejects_bad_coordinates() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        let fields = SyncFields {
            latitude: Some(-91.0),
            ..SyncFields::default()
        };
        let err = h.ctx.synchronize(id, fields).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        let fields = SyncFields {
            score: Some(12),
            ..SyncFields::default()
        };
        h.ctx.synchronize(id, fields).await.unwrap();
        assert_eq!(h.ctx.marker(id).unwrap().unwrap().score, 12);
    }

    #[tokio::test]
    async fn test_purge_removes_old_marks_only() {
        let h = harness();
        let old = register(&h, "a", LON, LAT).await;
        h.ctx.vote(vote(old, "b", LAT), VoteDirection::Down).await.unwrap();
        h.ctx.vote(vote(old, "c", LAT), VoteDirection::Down).await.unwrap();

        h.clock.advance_secs(2 * 3600);
        let fresh = register(&h, "f", LON, LAT + 0.01).await;
        h.ctx.vote(vote(fresh, "b", LAT + 0.01), VoteDirection::Down).await.unwrap();
        h.ctx.vote(vote(fresh, "c", LAT + 0.01), VoteDirection::Down).await.unwrap();

        let outcome = h.ctx.purge_marked(3_600_000).await.unwrap();
        assert_eq!(outcome, Outcome::Purged { removed: vec![old] });
        assert!(h.ctx.marker(old).unwrap().is_none());
        assert!(h.ctx.marker(fresh).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_erase_forgets_actor() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;
        h.ctx.vote(vote(id, "b", LAT), VoteDirection::Up).await.unwrap();

        let outcome = h.ctx.execute(Command::Erase { actor: actor("b") }).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Erased {
                tokens_deleted: 1,
                votes_deleted: 1,
                credibility_deleted: true
            }
        );

        // History survives with the voter anonymised
        let marker = h.ctx.repository().load(id).unwrap().unwrap();
        assert_eq!(marker.version(), 2);
        assert_eq!(marker.score(), 3);
    }

    #[tokio::test]
    async fn test_upvote_never_marks_for_deletion() {
        let h = harness();
        let outcome = h
            .ctx
            .import(vec![ImportItem {
                longitude: LON,
                latitude: LAT,
                score: Some(-20),
            }])
            .await
            .unwrap();
        let Outcome::Imported { items } = outcome else {
            panic!("unexpected outcome");
        };
        let ImportOutcome::Created { marker_id: id } = items[0].clone() else {
            panic!("item should be created");
        };

        let outcome = h.ctx.vote(vote(id, "b", LAT), VoteDirection::Up).await.unwrap();
        assert!(matches!(outcome, Outcome::Voted { score: -17, .. }));
        assert!(h.ctx.marker(id).unwrap().unwrap().marked_for_deletion_at.is_none());

        h.ctx.vote(vote(id, "c", LAT), VoteDirection::Down).await.unwrap();
        assert!(h.ctx.marker(id).unwrap().unwrap().marked_for_deletion_at.is_some());
    }

    #[tokio::test]
    async fn test_held_marker_lock_surfaces_as_lock_unavailable() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;

        let guard = h.ctx.locks.acquire(vec![LockKey::marker(id)]).await.unwrap();
        let err = h
            .ctx
            .execute(Command::Upvote(vote(id, "b", LAT)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOCK_UNAVAILABLE");
        assert_eq!(err.to_public().code, "LOCK_UNAVAILABLE");
        assert_eq!(h.ctx.marker(id).unwrap().unwrap().version, 1);

        drop(guard);
        let outcome = h.ctx.execute(Command::Upvote(vote(id, "b", LAT))).await.unwrap();
        assert!(matches!(outcome, Outcome::Voted { score: 3, .. }));
    }

    #[tokio::test]
    async fn test_lost_quorum_surfaces_as_lock_unavailable() {
        let config = GeomarkConfig::default();
        let key = geomark_core::identity::decode_key(&config.pseudonym.master_key_hex).unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let quorum = Arc::new(QuorumLock::in_process(
            config.locks.quorum_nodes,
            clock.clone(),
            config.locks.clock_drift_factor,
        ));
        let backends = Backends {
            database: Arc::new(Database::open_in_memory().unwrap()),
            pseudonymizer: Arc::new(PiiVault::open_in_memory(&key).unwrap()),
            credibility: Arc::new(CredibilityStore::open_in_memory().unwrap()),
            locks: quorum.clone(),
        };
        let ctx = CommandContext::assemble(
            &config,
            &key,
            backends,
            clock,
            Arc::new(RecordingQueue::new()),
        )
        .unwrap();

        quorum.node(0).unwrap().set_available(false);
        quorum.node(1).unwrap().set_available(false);
        let err = ctx
            .execute(Command::Register(Register {
                longitude: LON,
                latitude: LAT,
                actor: actor("a"),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.to_public().code, "LOCK_UNAVAILABLE");
        assert!(ctx.markers_near(&Coordinate::new(LON, LAT).unwrap(), 50.0).unwrap().is_empty());

        quorum.node(1).unwrap().set_available(true);
        let outcome = ctx
            .execute(Command::Register(Register {
                longitude: LON,
                latitude: LAT,
                actor: actor("a"),
            }))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Registered { .. }));
    }

    #[tokio::test]
    async fn test_register_locks_neighbouring_cell() {
        let h = harness();
        // About 2m apart on either side of a geohash cell edge
        let here = Coordinate::new(LON, 49.00931).unwrap();
        let across = Coordinate::new(LON, 49.00933).unwrap();
        assert_ne!(LockKey::area(&here, 8), LockKey::area(&across, 8));

        let guard = h.ctx.locks.acquire(vec![LockKey::area(&across, 8)]).await.unwrap();
        let err = h
            .ctx
            .register(Register {
                longitude: here.longitude,
                latitude: here.latitude,
                actor: actor("a"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOCK_UNAVAILABLE");

        drop(guard);
        register(&h, "a", here.longitude, here.latitude).await;
    }

    #[tokio::test]
    async fn test_synchronize_locks_destination_area() {
        let h = harness();
        let id = register(&h, "a", LON, LAT).await;
        let destination = Coordinate::new(LON, LAT + 0.001).unwrap();

        let guard = h
            .ctx
            .locks
            .acquire(vec![LockKey::area(&destination, 8)])
            .await
            .unwrap();
        let fields = SyncFields {
            latitude: Some(destination.latitude),
            ..SyncFields::default()
        };
        let err = h.ctx.synchronize(id, fields).await.unwrap_err();
        assert_eq!(err.code(), "LOCK_UNAVAILABLE");
        assert_eq!(h.ctx.marker(id).unwrap().unwrap().position, Coordinate::new(LON, LAT).unwrap());

        // Score-only updates do not move the marker and need no area
        let score_only = SyncFields {
            score: Some(3),
            ..SyncFields::default()
        };
        h.ctx.synchronize(id, score_only).await.unwrap();

        drop(guard);
        h.ctx.synchronize(id, fields).await.unwrap();
        assert_eq!(h.ctx.marker(id).unwrap().unwrap().position, destination);
    }

    #[tokio::test]
    async fn test_import_sync_locks_the_matched_marker_cell() {
        let h = harness();
        let existing = Coordinate::new(LON, 49.00931).unwrap();
        let incoming = Coordinate::new(LON, 49.00933).unwrap();
        let id = register(&h, "a", existing.longitude, existing.latitude).await;

        let guard = h.ctx.locks.acquire(vec![LockKey::area(&existing, 8)]).await.unwrap();
        let item = ImportItem {
            longitude: incoming.longitude,
            latitude: incoming.latitude,
            score: Some(9),
        };
        let outcome = h.ctx.import(vec![item.clone()]).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Imported { ref items } if matches!(&items[0], ImportOutcome::Failed { error } if error.code == "LOCK_UNAVAILABLE")
        ));

        drop(guard);
        let outcome = h.ctx.import(vec![item]).await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Imported {
                items: vec![ImportOutcome::Synchronized { marker_id: id }]
            }
        );
        assert_eq!(h.ctx.marker(id).unwrap().unwrap().position, incoming);
    }
}
