//! Command and outcome types.

use crate::error::PublicError;
use geomark_core::ActorId;
use geomark_domain::{MarkerId, ReportCategory, SyncFields};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub longitude: f64,
    pub latitude: f64,
    pub actor: ActorId,
}

/// Upvote or downvote; the position is where the actor is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub marker_id: MarkerId,
    pub longitude: f64,
    pub latitude: f64,
    pub actor: ActorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reposition {
    pub marker_id: MarkerId,
    /// Destination
    pub longitude: f64,
    pub latitude: f64,
    /// Where the editor is
    pub editor_longitude: f64,
    pub editor_latitude: f64,
    pub actor: ActorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub marker_id: MarkerId,
    pub longitude: f64,
    pub latitude: f64,
    pub actor: ActorId,
    pub category: ReportCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportItem {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub score: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Register(Register),
    Upvote(Vote),
    Downvote(Vote),
    Reposition(Reposition),
    Report(Report),
    Remove { marker_id: MarkerId },
    Restore { marker_id: MarkerId },
    Import { items: Vec<ImportItem> },
    Synchronize { marker_id: MarkerId, fields: SyncFields },
    PurgeMarked { older_than_ms: u64 },
    Erase { actor: ActorId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ImportOutcome {
    Created { marker_id: MarkerId },
    Synchronized { marker_id: MarkerId },
    Failed { error: PublicError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Registered {
        marker_id: MarkerId,
    },
    Voted {
        marker_id: MarkerId,
        delta: i64,
        score: i64,
    },
    /// Repeat vote inside the cooldown; nothing recorded
    VoteIgnored {
        marker_id: MarkerId,
    },
    Repositioned {
        marker_id: MarkerId,
    },
    Reported {
        marker_id: MarkerId,
        marked_for_deletion: bool,
    },
    Removed {
        marker_id: MarkerId,
    },
    Restored {
        marker_id: MarkerId,
        restored_from: MarkerId,
    },
    Imported {
        items: Vec<ImportOutcome>,
    },
    Synchronized {
        marker_id: MarkerId,
    },
    Purged {
        removed: Vec<MarkerId>,
    },
    Erased {
        tokens_deleted: usize,
        votes_deleted: usize,
        credibility_deleted: bool,
    },
}

impl Outcome {
    /// Marker the outcome refers to, for single-marker commands
    pub fn marker_id(&self) -> Option<MarkerId> {
        match self {
            Outcome::Registered { marker_id }
            | Outcome::Voted { marker_id, .. }
            | Outcome::VoteIgnored { marker_id }
            | Outcome::Repositioned { marker_id }
            | Outcome::Reported { marker_id, .. }
            | Outcome::Removed { marker_id }
            | Outcome::Restored { marker_id, .. }
            | Outcome::Synchronized { marker_id } => Some(*marker_id),
            _ => None,
        }
    }
}
