//! Marker persistence.
//!
//! `load` rebuilds an aggregate from its latest snapshot plus the events
//! after it, resolving actor tokens through the PII vault (an unresolvable
//! token becomes an anonymous actor). `save` tokenizes the pending events,
//! appends them under the aggregate's committed version and then refreshes
//! the derived data: snapshot, read model, vote ledger and tile queue.

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::event_log::{EventCursor, EventLog};
use crate::queue::{Queue, TILES_TOPIC};
use crate::read_model::{MarkerDocument, ReadModel};
use crate::snapshots::{SnapshotRepository, SnapshotWrite};
use crate::votes::{VoteDirection, VoteLedger, VoteRecord};
use crate::{StoredEventBody, StoredState};
use geomark_core::config::StoreConfig;
use geomark_core::{ActorId, Clock, Fingerprinter};
use geomark_domain::{DomainEvent, Marker, MarkerEvent, MarkerId, MarkerState};
use geomark_pseudonym::{actor_from_data, tokenize_actor, PiiToken, Pseudonymizer};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What an actor erasure removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErasureReport {
    pub tokens_deleted: usize,
    pub votes_deleted: usize,
}

pub struct MarkerRepository {
    events: EventLog,
    snapshots: SnapshotRepository,
    read_model: ReadModel,
    votes: VoteLedger,
    pseudonymizer: Arc<dyn Pseudonymizer>,
    fingerprinter: Fingerprinter,
    queue: Arc<dyn Queue>,
    clock: Arc<dyn Clock>,
    snapshot_interval: u64,
    batch_size: usize,
}

impl MarkerRepository {
    pub fn new(
        db: Arc<Database>,
        pseudonymizer: Arc<dyn Pseudonymizer>,
        fingerprinter: Fingerprinter,
        queue: Arc<dyn Queue>,
        clock: Arc<dyn Clock>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            events: EventLog::new(db.clone()),
            snapshots: SnapshotRepository::new(db.clone()),
            read_model: ReadModel::new(db.clone()),
            votes: VoteLedger::new(db),
            pseudonymizer,
            fingerprinter,
            queue,
            clock,
            snapshot_interval: config.snapshot_interval.max(1),
            batch_size: config.load_batch_size.max(1),
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn snapshots(&self) -> &SnapshotRepository {
        &self.snapshots
    }

    pub fn read_model(&self) -> &ReadModel {
        &self.read_model
    }

    pub fn votes(&self) -> &VoteLedger {
        &self.votes
    }

    pub fn fingerprint(&self, actor: &ActorId) -> String {
        self.fingerprinter.fingerprint(actor)
    }

    /// Rebuild a marker; `None` if it has no history
    pub fn load(&self, id: MarkerId) -> Result<Option<Marker>> {
        let stream_id = id.to_string();

        let mut marker = match self.snapshots.get(&stream_id)? {
            Some(snapshot) => Marker::from_state(self.resolve_state(snapshot)?),
            None => Marker::empty(id),
        };
        let from_version = marker.version();

        let mut cursor = Some(EventCursor::new(
            stream_id.as_str(),
            from_version,
            self.batch_size,
        ));
        while let Some(current) = cursor {
            let page = self.events.next_page(&current)?;

            let tokens: Vec<PiiToken> = page
                .events
                .iter()
                .filter_map(|e| e.payload.actor().cloned().flatten())
                .collect();
            let resolved = self.pseudonymizer.detokenize_many(&tokens)?;

            for stored in page.events {
                if stored.version != marker.version() + 1 {
                    error!(marker_id = %id, expected = marker.version() + 1, found = stored.version, "Event stream has a gap");
                    return Err(StoreError::Corrupt(format!(
                        "stream {} jumps from version {} to {}",
                        stream_id,
                        marker.version(),
                        stored.version
                    )));
                }
                let event: DomainEvent = stored
                    .payload
                    .try_map_actor(|token| Ok::<_, StoreError>(resolve(&resolved, token)))?;
                marker.apply_committed(&event);
            }
            cursor = page.next;
        }

        if !marker.exists() {
            return Ok(None);
        }
        debug!(
            marker_id = %id,
            version = marker.version(),
            replayed = marker.version() - from_version,
            "Marker loaded"
        );
        Ok(Some(marker))
    }

    /// Persist the pending events of `marker`.
    ///
    /// Fails with [`StoreError::VersionConflict`] if another writer got
    /// there first; nothing is written in that case.
    pub fn save(&self, marker: &mut Marker) -> Result<()> {
        if marker.pending_events().is_empty() {
            return Ok(());
        }

        let id = marker.id();
        let stream_id = id.to_string();
        let expected = marker.committed_version();
        let now = self.clock.now_ms();

        let stored = marker
            .pending_events()
            .iter()
            .cloned()
            .map(|event| event.try_map_actor(|actor| self.tokenize(actor)))
            .collect::<Result<Vec<StoredEventBody>>>()?;

        let version = self.events.append(&stream_id, expected, &stored, now)?;
        let committed = marker.pending_events().to_vec();
        marker.mark_committed();

        if expected / self.snapshot_interval != version / self.snapshot_interval {
            if let Err(e) = self.write_snapshot(marker.state(), now) {
                warn!(marker_id = %id, version, error = %e, "Snapshot write failed");
            }
        }

        self.record_votes(id, expected, &committed, now)?;
        self.refresh_read_model(marker.state(), &committed, now)?;
        self.publish_tiles(marker.state(), &committed);

        info!(marker_id = %id, from = expected, to = version, "Marker saved");
        Ok(())
    }

    /// Delete an actor's PII tokens and vote rows; event streams are untouched
    pub fn erase_actor(&self, actor: &ActorId) -> Result<ErasureReport> {
        let tokens_deleted = self.pseudonymizer.erase_authority(actor)?;
        let votes_deleted = self.votes.erase_actor(&self.fingerprint(actor))?;
        Ok(ErasureReport {
            tokens_deleted,
            votes_deleted,
        })
    }

    fn tokenize(&self, actor: Option<ActorId>) -> Result<Option<PiiToken>> {
        Ok(actor
            .map(|a| tokenize_actor(self.pseudonymizer.as_ref(), &a))
            .transpose()?)
    }

    fn resolve_state(&self, snapshot: StoredState) -> Result<MarkerState> {
        let resolved = self.pseudonymizer.detokenize_many(&reporter_tokens(&snapshot))?;
        snapshot.try_map_actor(|token| Ok::<_, StoreError>(resolve(&resolved, token)))
    }

    /// Store a tokenized snapshot and discard the tokens of whichever copy
    /// lost: the superseded snapshot, or this one if a newer one exists
    fn write_snapshot(&self, state: &MarkerState, now: u64) -> Result<()> {
        let stored = state
            .clone()
            .try_map_actor(|actor| self.tokenize(actor))?;
        let unreferenced = match self.snapshots.put(&stored, now)? {
            SnapshotWrite::Replaced(previous) => {
                previous.as_ref().map(reporter_tokens).unwrap_or_default()
            }
            SnapshotWrite::Stale => reporter_tokens(&stored),
        };
        if !unreferenced.is_empty() {
            let discarded = self.pseudonymizer.discard(&unreferenced)?;
            debug!(marker_id = %state.id, discarded, "Superseded snapshot tokens discarded");
        }
        debug!(marker_id = %state.id, version = state.version, "Snapshot written");
        Ok(())
    }

    fn record_votes(
        &self,
        id: MarkerId,
        expected: u64,
        committed: &[DomainEvent],
        now: u64,
    ) -> Result<()> {
        for (offset, event) in committed.iter().enumerate() {
            let (voter, credibility, delta, direction) = match event {
                MarkerEvent::Upvoted {
                    voter: Some(voter),
                    credibility,
                    delta,
                } => (voter, *credibility, *delta, VoteDirection::Up),
                MarkerEvent::Downvoted {
                    voter: Some(voter),
                    credibility,
                    delta,
                } => (voter, *credibility, *delta, VoteDirection::Down),
                _ => continue,
            };
            self.votes.record(&VoteRecord {
                marker_id: id,
                actor: self.fingerprint(voter),
                direction,
                credibility,
                delta,
                version: expected + offset as u64 + 1,
                at: now,
            })?;
        }
        Ok(())
    }

    fn refresh_read_model(
        &self,
        state: &MarkerState,
        committed: &[DomainEvent],
        now: u64,
    ) -> Result<()> {
        let creates = committed.iter().any(|e| {
            matches!(
                e,
                MarkerEvent::Registered { .. }
                    | MarkerEvent::Imported { .. }
                    | MarkerEvent::Restored { .. }
            )
        });

        let consistent = if state.removed {
            self.read_model.delete(state.id)? || creates
        } else if creates {
            self.read_model.upsert(&MarkerDocument::from(state), now)?;
            true
        } else {
            self.read_model.update(&MarkerDocument::from(state), now)?
        };

        if !consistent {
            error!(marker_id = %state.id, version = state.version, "Read model document missing");
            return Err(StoreError::InconsistentReadModel {
                marker_id: state.id,
            });
        }
        Ok(())
    }

    fn publish_tiles(&self, state: &MarkerState, committed: &[DomainEvent]) {
        for event in committed.iter().filter(|e| e.affects_tiles()) {
            let (former, position) = match event {
                MarkerEvent::Repositioned {
                    former, position, ..
                } => (Some(*former), *position),
                MarkerEvent::Registered { position, .. }
                | MarkerEvent::Imported { position, .. }
                | MarkerEvent::Restored { position, .. } => (None, *position),
                _ => (None, state.position),
            };
            let payload = json!({
                "marker_id": state.id,
                "event": event.kind(),
                "former": former,
                "position": position,
            });
            if let Err(e) = self.queue.enqueue(TILES_TOPIC, payload) {
                warn!(marker_id = %state.id, error = %e, "Tile recomputation not enqueued");
            }
        }
    }
}

fn reporter_tokens(state: &StoredState) -> Vec<PiiToken> {
    state
        .recent_reports
        .iter()
        .filter_map(|r| r.reporter.clone())
        .collect()
}

fn resolve(
    resolved: &HashMap<PiiToken, serde_json::Value>,
    token: Option<PiiToken>,
) -> Option<ActorId> {
    token.and_then(|t| resolved.get(&t).and_then(actor_from_data))
}
