//! SQLite bootstrap shared by the event log, snapshots, read model and
//! vote ledger.

use crate::error::{Result, StoreError};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening marker database");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // The store and credibility tables share one file
        conn.busy_timeout(Duration::from_secs(5))?;

        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq_no INTEGER PRIMARY KEY AUTOINCREMENT,
                stream_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                UNIQUE (stream_id, version)
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                stream_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS markers (
                id TEXT PRIMARY KEY,
                longitude REAL NOT NULL,
                latitude REAL NOT NULL,
                score INTEGER NOT NULL,
                imported INTEGER NOT NULL,
                marked_for_deletion_at INTEGER,
                restored_from TEXT,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_markers_position ON markers(latitude, longitude);
            CREATE INDEX IF NOT EXISTS idx_markers_marked ON markers(marked_for_deletion_at);

            CREATE TABLE IF NOT EXISTS votes (
                marker_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                direction TEXT NOT NULL,
                credibility INTEGER NOT NULL,
                delta INTEGER NOT NULL,
                version INTEGER NOT NULL,
                at INTEGER NOT NULL,
                PRIMARY KEY (marker_id, version)
            );

            CREATE INDEX IF NOT EXISTS idx_votes_actor ON votes(actor, marker_id);
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_keeps_schema_and_rows() {
        let path = std::env::temp_dir().join(format!("test_store_{}.db", uuid::Uuid::new_v4()));
        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .unwrap()
                .execute(
                    "INSERT INTO snapshots (stream_id, version, state, updated_at) VALUES ('s', 1, '{}', 0)",
                    [],
                )
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        std::fs::remove_file(&path).ok();
    }
}
