//! Marker events
//!
//! Events are immutable facts. The enum is generic over the representation
//! of actor references: in memory an actor is `Option<ActorId>` (`None` once
//! anonymised), in durable storage it is an opaque PII token. The store
//! converts between the two with [`MarkerEvent::try_map_actor`].

use crate::error::{DomainError, Result};
use geomark_core::{ActorId, Coordinate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Marker identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(Uuid);

impl MarkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MarkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MarkerId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidMarkerId(format!("{}: {}", s, e)))
    }
}

/// Why a marker was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    Spam,
    Inappropriate,
    Misplaced,
    Nonexistent,
    Other,
}

/// Fields forced by bulk import reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncFields {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub score: Option<i64>,
}

impl SyncFields {
    pub fn is_empty(&self) -> bool {
        self.longitude.is_none() && self.latitude.is_none() && self.score.is_none()
    }
}

/// A fact about one marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarkerEvent<A> {
    Registered {
        position: Coordinate,
        creator: A,
    },
    Imported {
        position: Coordinate,
        score: Option<i64>,
    },
    Upvoted {
        voter: A,
        credibility: u8,
        /// Effective score change after clamping
        delta: i64,
    },
    Downvoted {
        voter: A,
        credibility: u8,
        /// Effective score change after clamping (negative or zero)
        delta: i64,
    },
    Repositioned {
        editor: A,
        credibility: u8,
        former: Coordinate,
        position: Coordinate,
    },
    Reported {
        reporter: A,
        category: ReportCategory,
        at: u64,
    },
    Synchronized {
        fields: SyncFields,
    },
    MarkedForDeletion {
        at: u64,
    },
    DeletionMarkCleared,
    Removed,
    Restored {
        restored_from: MarkerId,
        position: Coordinate,
        score: i64,
    },
}

/// Event with in-memory actor references
pub type DomainEvent = MarkerEvent<Option<ActorId>>;

impl<A> MarkerEvent<A> {
    /// Stable type discriminator stored alongside the payload
    pub fn kind(&self) -> &'static str {
        match self {
            MarkerEvent::Registered { .. } => "Registered",
            MarkerEvent::Imported { .. } => "Imported",
            MarkerEvent::Upvoted { .. } => "Upvoted",
            MarkerEvent::Downvoted { .. } => "Downvoted",
            MarkerEvent::Repositioned { .. } => "Repositioned",
            MarkerEvent::Reported { .. } => "Reported",
            MarkerEvent::Synchronized { .. } => "Synchronized",
            MarkerEvent::MarkedForDeletion { .. } => "MarkedForDeletion",
            MarkerEvent::DeletionMarkCleared => "DeletionMarkCleared",
            MarkerEvent::Removed => "Removed",
            MarkerEvent::Restored { .. } => "Restored",
        }
    }

    /// The actor-identity field, for event types that carry one
    pub fn actor(&self) -> Option<&A> {
        match self {
            MarkerEvent::Registered { creator, .. } => Some(creator),
            MarkerEvent::Upvoted { voter, .. } | MarkerEvent::Downvoted { voter, .. } => {
                Some(voter)
            }
            MarkerEvent::Repositioned { editor, .. } => Some(editor),
            MarkerEvent::Reported { reporter, .. } => Some(reporter),
            _ => None,
        }
    }

    /// Whether the event changes what map tiles show
    pub fn affects_tiles(&self) -> bool {
        !matches!(
            self,
            MarkerEvent::Reported { .. }
                | MarkerEvent::MarkedForDeletion { .. }
                | MarkerEvent::DeletionMarkCleared
        )
    }

    /// Convert the actor representation, leaving everything else untouched
    pub fn try_map_actor<B, E>(
        self,
        mut f: impl FnMut(A) -> std::result::Result<B, E>,
    ) -> std::result::Result<MarkerEvent<B>, E> {
        Ok(match self {
            MarkerEvent::Registered { position, creator } => MarkerEvent::Registered {
                position,
                creator: f(creator)?,
            },
            MarkerEvent::Upvoted {
                voter,
                credibility,
                delta,
            } => MarkerEvent::Upvoted {
                voter: f(voter)?,
                credibility,
                delta,
            },
            MarkerEvent::Downvoted {
                voter,
                credibility,
                delta,
            } => MarkerEvent::Downvoted {
                voter: f(voter)?,
                credibility,
                delta,
            },
            MarkerEvent::Repositioned {
                editor,
                credibility,
                former,
                position,
            } => MarkerEvent::Repositioned {
                editor: f(editor)?,
                credibility,
                former,
                position,
            },
            MarkerEvent::Reported {
                reporter,
                category,
                at,
            } => MarkerEvent::Reported {
                reporter: f(reporter)?,
                category,
                at,
            },
            MarkerEvent::Imported { position, score } => MarkerEvent::Imported { position, score },
            MarkerEvent::Synchronized { fields } => MarkerEvent::Synchronized { fields },
            MarkerEvent::MarkedForDeletion { at } => MarkerEvent::MarkedForDeletion { at },
            MarkerEvent::DeletionMarkCleared => MarkerEvent::DeletionMarkCleared,
            MarkerEvent::Removed => MarkerEvent::Removed,
            MarkerEvent::Restored {
                restored_from,
                position,
                score,
            } => MarkerEvent::Restored {
                restored_from,
                position,
                score,
            },
        })
    }
}
