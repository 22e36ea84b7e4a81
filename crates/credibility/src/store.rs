//! Durable credibility records, keyed by actor fingerprint.

use crate::behaviour::Behaviour;
use crate::error::{CredibilityError, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredibilityRecord {
    pub fingerprint: String,
    pub rating: u8,
    pub behaviour: Behaviour,
}

pub struct CredibilityStore {
    conn: Mutex<Connection>,
}

impl CredibilityStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening credibility store");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // The store and credibility tables share one file
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credibility (
                fingerprint TEXT PRIMARY KEY,
                rating INTEGER NOT NULL,
                behaviour TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CredibilityError::LockPoisoned)
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<CredibilityRecord>> {
        read(&*self.conn()?, fingerprint)
    }

    pub fn put(&self, record: &CredibilityRecord, now_ms: u64) -> Result<()> {
        write(&*self.conn()?, record, now_ms)
    }

    /// Read, change and write one record as a single unit.
    ///
    /// The IMMEDIATE transaction takes the database write lock before the
    /// read, which also serializes other connections to the same file.
    pub fn modify<F>(&self, fingerprint: &str, now_ms: u64, f: F) -> Result<CredibilityRecord>
    where
        F: FnOnce(Option<CredibilityRecord>) -> CredibilityRecord,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let record = f(read(&tx, fingerprint)?);
        write(&tx, &record, now_ms)?;
        tx.commit()?;
        Ok(record)
    }

    /// Returns whether a record existed
    pub fn delete(&self, fingerprint: &str) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM credibility WHERE fingerprint = ?1", [fingerprint])?;
        Ok(deleted > 0)
    }
}

fn read(conn: &Connection, fingerprint: &str) -> Result<Option<CredibilityRecord>> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT rating, behaviour FROM credibility WHERE fingerprint = ?1",
            [fingerprint],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(rating, behaviour)| -> Result<CredibilityRecord> {
        Ok(CredibilityRecord {
            fingerprint: fingerprint.to_string(),
            rating: rating.clamp(0, 100) as u8,
            behaviour: serde_json::from_str(&behaviour)?,
        })
    })
    .transpose()
}

fn write(conn: &Connection, record: &CredibilityRecord, now_ms: u64) -> Result<()> {
    let behaviour = serde_json::to_string(&record.behaviour)?;
    conn.execute(
        r#"
        INSERT INTO credibility (fingerprint, rating, behaviour, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(fingerprint) DO UPDATE SET
            rating = excluded.rating,
            behaviour = excluded.behaviour,
            updated_at = excluded.updated_at
        "#,
        params![record.fingerprint, record.rating as i64, behaviour, now_ms as i64],
    )?;
    Ok(())
}
