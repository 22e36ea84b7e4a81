//! The `Marker` aggregate.
//!
//! State is only ever changed by folding events through
//! [`MarkerState::apply`]. Mutators record a fact; they do not check business
//! rules (distance, throttling, cooldowns) – that is the command handlers'
//! job. The only failure a mutator reports is an invariant violation such as
//! acting on a removed marker, which is a programming error in the caller.

use crate::error::{DomainError, Result};
use crate::event::{DomainEvent, MarkerEvent, MarkerId, ReportCategory, SyncFields};
use crate::policy::ScorePolicy;
use geomark_core::{ActorId, Coordinate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Size of the recent-reports window kept for spam detection
pub const RECENT_REPORTS_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry<A> {
    pub reporter: A,
    pub category: ReportCategory,
    pub at: u64,
}

/// Folded marker state.
///
/// Generic over the actor representation so the same structure doubles as
/// the persisted snapshot (with tokenized reporters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerState<A = Option<ActorId>> {
    pub id: MarkerId,
    /// Number of events applied
    pub version: u64,
    pub position: Coordinate,
    pub score: i64,
    pub imported: bool,
    pub marked_for_deletion_at: Option<u64>,
    pub removed: bool,
    pub restored_from: Option<MarkerId>,
    /// Oldest first, at most [`RECENT_REPORTS_CAPACITY`] entries
    pub recent_reports: Vec<ReportEntry<A>>,
}

impl<A: Clone> MarkerState<A> {
    pub fn empty(id: MarkerId) -> Self {
        Self {
            id,
            version: 0,
            position: Coordinate {
                longitude: 0.0,
                latitude: 0.0,
            },
            score: 0,
            imported: false,
            marked_for_deletion_at: None,
            removed: false,
            restored_from: None,
            recent_reports: Vec::new(),
        }
    }

    /// Fold one event into the state. Always advances `version` by one.
    pub fn apply(mut self, event: &MarkerEvent<A>) -> Self {
        match event {
            MarkerEvent::Registered { position, .. } => {
                self.position = *position;
                self.score = 0;
            }
            MarkerEvent::Imported { position, score } => {
                self.position = *position;
                self.score = score.unwrap_or(0);
                self.imported = true;
            }
            MarkerEvent::Upvoted { delta, .. } | MarkerEvent::Downvoted { delta, .. } => {
                self.score += delta;
            }
            MarkerEvent::Repositioned { position, .. } => {
                self.position = *position;
            }
            MarkerEvent::Reported {
                reporter,
                category,
                at,
            } => {
                self.recent_reports.push(ReportEntry {
                    reporter: reporter.clone(),
                    category: *category,
                    at: *at,
                });
                if self.recent_reports.len() > RECENT_REPORTS_CAPACITY {
                    self.recent_reports.remove(0);
                }
            }
            MarkerEvent::Synchronized { fields } => {
                if let Some(longitude) = fields.longitude {
                    self.position.longitude = longitude;
                }
                if let Some(latitude) = fields.latitude {
                    self.position.latitude = latitude;
                }
                if let Some(score) = fields.score {
                    self.score = score;
                }
            }
            MarkerEvent::MarkedForDeletion { at } => {
                self.marked_for_deletion_at = Some(*at);
            }
            MarkerEvent::DeletionMarkCleared => {
                self.marked_for_deletion_at = None;
            }
            MarkerEvent::Removed => {
                self.removed = true;
            }
            MarkerEvent::Restored {
                restored_from,
                position,
                score,
            } => {
                self.position = *position;
                self.score = *score;
                self.restored_from = Some(*restored_from);
            }
        }
        self.version += 1;
        self
    }
}

impl<A> MarkerState<A> {
    /// Convert the actor representation of the report window
    pub fn try_map_actor<B, E>(
        self,
        mut f: impl FnMut(A) -> std::result::Result<B, E>,
    ) -> std::result::Result<MarkerState<B>, E> {
        let recent_reports = self
            .recent_reports
            .into_iter()
            .map(|r| {
                Ok(ReportEntry {
                    reporter: f(r.reporter)?,
                    category: r.category,
                    at: r.at,
                })
            })
            .collect::<std::result::Result<Vec<_>, E>>()?;

        Ok(MarkerState {
            id: self.id,
            version: self.version,
            position: self.position,
            score: self.score,
            imported: self.imported,
            marked_for_deletion_at: self.marked_for_deletion_at,
            removed: self.removed,
            restored_from: self.restored_from,
            recent_reports,
        })
    }
}

/// Event-sourced marker aggregate
#[derive(Debug, Clone)]
pub struct Marker {
    state: MarkerState,
    pending: Vec<DomainEvent>,
}

impl Marker {
    /// Aggregate with no history, ready to have committed events folded in
    pub fn empty(id: MarkerId) -> Self {
        Self::from_state(MarkerState::empty(id))
    }

    /// Rehydrate from a snapshot (or a fully folded state)
    pub fn from_state(state: MarkerState) -> Self {
        Self {
            state,
            pending: Vec::new(),
        }
    }

    /// Create a marker registered by an actor
    pub fn register(position: Coordinate, creator: ActorId) -> Self {
        let mut marker = Self::empty(MarkerId::new());
        marker.record(MarkerEvent::Registered {
            position,
            creator: Some(creator),
        });
        marker
    }

    /// Create a marker from bulk import
    pub fn import(position: Coordinate, score: Option<i64>) -> Self {
        let mut marker = Self::empty(MarkerId::new());
        marker.record(MarkerEvent::Imported { position, score });
        marker
    }

    /// Recreate a removed marker under a new identity
    pub fn restore(original: &Marker) -> Result<Self> {
        if !original.is_removed() {
            return Err(DomainError::InvariantViolation(format!(
                "marker {} is not removed and cannot be restored",
                original.id()
            )));
        }
        let mut marker = Self::empty(MarkerId::new());
        marker.record(MarkerEvent::Restored {
            restored_from: original.id(),
            position: original.position(),
            score: original.score(),
        });
        Ok(marker)
    }

    /// Fold an already persisted event (load path; nothing becomes pending)
    pub fn apply_committed(&mut self, event: &DomainEvent) {
        self.fold(event);
    }

    pub fn upvote(
        &mut self,
        voter: ActorId,
        credibility: u8,
        policy: &ScorePolicy,
    ) -> Result<i64> {
        self.ensure_active("upvote")?;
        let delta = policy.clamp_delta(self.state.score, policy.weight_for(credibility));
        self.record(MarkerEvent::Upvoted {
            voter: Some(voter),
            credibility,
            delta,
        });
        Ok(delta)
    }

    pub fn downvote(
        &mut self,
        voter: ActorId,
        credibility: u8,
        policy: &ScorePolicy,
    ) -> Result<i64> {
        self.ensure_active("downvote")?;
        let delta = policy.clamp_delta(self.state.score, -policy.weight_for(credibility));
        self.record(MarkerEvent::Downvoted {
            voter: Some(voter),
            credibility,
            delta,
        });
        Ok(delta)
    }

    pub fn reposition(
        &mut self,
        editor: ActorId,
        credibility: u8,
        position: Coordinate,
    ) -> Result<()> {
        self.ensure_active("reposition")?;
        let former = self.state.position;
        self.record(MarkerEvent::Repositioned {
            editor: Some(editor),
            credibility,
            former,
            position,
        });
        Ok(())
    }

    pub fn report(&mut self, reporter: ActorId, category: ReportCategory, at: u64) -> Result<()> {
        self.ensure_active("report")?;
        self.record(MarkerEvent::Reported {
            reporter: Some(reporter),
            category,
            at,
        });
        Ok(())
    }

    /// Force fields from import reconciliation. The score is clamped.
    pub fn synchronize(&mut self, mut fields: SyncFields, policy: &ScorePolicy) -> Result<()> {
        self.ensure_active("synchronize")?;
        fields.score = fields.score.map(|s| policy.clamp(s));
        self.record(MarkerEvent::Synchronized { fields });
        Ok(())
    }

    /// Returns `false` when the marker was already marked
    pub fn mark_for_deletion(&mut self, at: u64) -> Result<bool> {
        self.ensure_active("mark for deletion")?;
        if self.state.marked_for_deletion_at.is_some() {
            return Ok(false);
        }
        self.record(MarkerEvent::MarkedForDeletion { at });
        Ok(true)
    }

    /// Returns `false` when there was no mark to clear
    pub fn clear_deletion_mark(&mut self) -> Result<bool> {
        self.ensure_active("clear deletion mark")?;
        if self.state.marked_for_deletion_at.is_none() {
            return Ok(false);
        }
        self.record(MarkerEvent::DeletionMarkCleared);
        Ok(true)
    }

    pub fn remove(&mut self) -> Result<()> {
        self.ensure_active("remove")?;
        self.record(MarkerEvent::Removed);
        Ok(())
    }

    /// Number of distinct reporters of `category` in the recent window.
    /// Anonymised reporters are counted individually.
    pub fn distinct_reporters(&self, category: ReportCategory) -> usize {
        let mut known = HashSet::new();
        let mut anonymous = 0;
        for entry in self
            .state
            .recent_reports
            .iter()
            .filter(|r| r.category == category)
        {
            match &entry.reporter {
                Some(actor) => {
                    known.insert(actor);
                }
                None => anonymous += 1,
            }
        }
        known.len() + anonymous
    }

    pub fn id(&self) -> MarkerId {
        self.state.id
    }

    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// Version persisted before the pending events; the append precondition
    pub fn committed_version(&self) -> u64 {
        self.state.version - self.pending.len() as u64
    }

    pub fn position(&self) -> Coordinate {
        self.state.position
    }

    pub fn score(&self) -> i64 {
        self.state.score
    }

    pub fn is_imported(&self) -> bool {
        self.state.imported
    }

    pub fn is_removed(&self) -> bool {
        self.state.removed
    }

    pub fn exists(&self) -> bool {
        self.state.version > 0
    }

    pub fn marked_for_deletion_at(&self) -> Option<u64> {
        self.state.marked_for_deletion_at
    }

    pub fn state(&self) -> &MarkerState {
        &self.state
    }

    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending
    }

    /// Called by the store once pending events are durable
    pub fn mark_committed(&mut self) {
        self.pending.clear();
    }

    fn ensure_active(&self, action: &str) -> Result<()> {
        if !self.exists() {
            return Err(DomainError::InvariantViolation(format!(
                "cannot {} marker {} without history",
                action,
                self.id()
            )));
        }
        if self.is_removed() {
            return Err(DomainError::InvariantViolation(format!(
                "cannot {} removed marker {}",
                action,
                self.id()
            )));
        }
        Ok(())
    }

    fn record(&mut self, event: DomainEvent) {
        self.fold(&event);
        self.pending.push(event);
    }

    fn fold(&mut self, event: &DomainEvent) {
        let id = self.state.id;
        let state = std::mem::replace(&mut self.state, MarkerState::empty(id));
        self.state = state.apply(event);
    }
}
