//! Periodic materialisations of marker state.
//!
//! Snapshots are an optimisation: a missing or failed snapshot only means
//! the next load replays more events.

use crate::database::Database;
use crate::error::Result;
use crate::StoredState;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

/// Result of [`SnapshotRepository::put`]
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotWrite {
    /// Stored; carries the snapshot it superseded
    Replaced(Option<StoredState>),
    /// A snapshot at this version or newer is already stored
    Stale,
}

#[derive(Clone)]
pub struct SnapshotRepository {
    db: Arc<Database>,
}

impl SnapshotRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, stream_id: &str) -> Result<Option<StoredState>> {
        let state: Option<String> = self
            .db
            .conn()?
            .query_row(
                "SELECT state FROM snapshots WHERE stream_id = ?1",
                [stream_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    /// Insert or replace; an older version never overwrites a newer one
    pub fn put(&self, state: &StoredState, updated_at: u64) -> Result<SnapshotWrite> {
        let stream_id = state.id.to_string();
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;

        let previous: Option<(i64, String)> = tx
            .query_row(
                "SELECT version, state FROM snapshots WHERE stream_id = ?1",
                [&stream_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((version, _)) = &previous {
            if *version as u64 >= state.version {
                return Ok(SnapshotWrite::Stale);
            }
        }
        let previous = previous
            .map(|(_, state)| serde_json::from_str(&state))
            .transpose()?;

        tx.execute(
            r#"
            INSERT INTO snapshots (stream_id, version, state, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(stream_id) DO UPDATE SET
                version = excluded.version,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
            params![
                stream_id,
                state.version as i64,
                serde_json::to_string(state)?,
                updated_at as i64,
            ],
        )?;
        tx.commit()?;
        Ok(SnapshotWrite::Replaced(previous))
    }

    pub fn delete(&self, stream_id: &str) -> Result<bool> {
        Ok(self
            .db
            .conn()?
            .execute("DELETE FROM snapshots WHERE stream_id = ?1", [stream_id])?
            > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomark_domain::{MarkerId, MarkerState};

    #[test]
    fn test_newer_snapshot_wins() {
        let repo = SnapshotRepository::new(Arc::new(Database::open_in_memory().unwrap()));
        let id = MarkerId::new();

        let mut state: StoredState = MarkerState::empty(id);
        state.version = 10;
        state.score = 7;
        assert_eq!(repo.put(&state, 1).unwrap(), SnapshotWrite::Replaced(None));

        let mut stale = state.clone();
        stale.version = 5;
        stale.score = 1;
        assert_eq!(repo.put(&stale, 2).unwrap(), SnapshotWrite::Stale);
        assert_eq!(repo.put(&state, 3).unwrap(), SnapshotWrite::Stale);
        assert_eq!(repo.get(&id.to_string()).unwrap(), Some(state.clone()));

        let mut newer = state.clone();
        newer.version = 15;
        assert_eq!(repo.put(&newer, 4).unwrap(), SnapshotWrite::Replaced(Some(state)));
        assert_eq!(repo.get(&id.to_string()).unwrap(), Some(newer));
        assert!(repo.delete(&id.to_string()).unwrap());
        assert!(repo.get(&id.to_string()).unwrap().is_none());
    }
}
