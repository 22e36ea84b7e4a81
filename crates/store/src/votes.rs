//! Vote ledger: one row per recorded vote, keyed by actor fingerprint.

use crate::database::Database;
use crate::error::{Result, StoreError};
use geomark_domain::MarkerId;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }
}

impl FromStr for VoteDirection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(VoteDirection::Up),
            "down" => Ok(VoteDirection::Down),
            other => Err(StoreError::Corrupt(format!("unknown vote direction {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub marker_id: MarkerId,
    /// Actor fingerprint
    pub actor: String,
    pub direction: VoteDirection,
    pub credibility: u8,
    pub delta: i64,
    /// Stream version of the vote event
    pub version: u64,
    pub at: u64,
}

#[derive(Clone)]
pub struct VoteLedger {
    db: Arc<Database>,
}

impl VoteLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn record(&self, vote: &VoteRecord) -> Result<()> {
        self.db.conn()?.execute(
            r#"
            INSERT OR REPLACE INTO votes (marker_id, actor, direction, credibility, delta, version, at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                vote.marker_id.to_string(),
                vote.actor,
                vote.direction.as_str(),
                vote.credibility as i64,
                vote.delta,
                vote.version as i64,
                vote.at as i64,
            ],
        )?;
        Ok(())
    }

    /// Most recent vote by `actor` on `marker_id`
    pub fn last_vote(&self, marker_id: MarkerId, actor: &str) -> Result<Option<VoteRecord>> {
        let row: Option<(String, i64, i64, i64, i64)> = self
            .db
            .conn()?
            .query_row(
                r#"
                SELECT direction, credibility, delta, version, at FROM votes
                WHERE marker_id = ?1 AND actor = ?2
                ORDER BY version DESC LIMIT 1
                "#,
                params![marker_id.to_string(), actor],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        row.map(|(direction, credibility, delta, version, at)| -> Result<VoteRecord> {
            Ok(VoteRecord {
                marker_id,
                actor: actor.to_string(),
                direction: direction.parse()?,
                credibility: credibility.clamp(0, 100) as u8,
                delta,
                version: version as u64,
                at: at as u64,
            })
        })
        .transpose()
    }

    pub fn count_for_marker(&self, marker_id: MarkerId) -> Result<u64> {
        let count: i64 = self.db.conn()?.query_row(
            "SELECT COUNT(*) FROM votes WHERE marker_id = ?1",
            [marker_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete every row of an actor; returns the number deleted
    pub fn erase_actor(&self, actor: &str) -> Result<usize> {
        Ok(self
            .db
            .conn()?
            .execute("DELETE FROM votes WHERE actor = ?1", [actor])?)
    }
}
