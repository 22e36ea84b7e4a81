//! Append-only, versioned event streams.
//!
//! Each stream is one aggregate. `version` starts at 1 and increases by
//! exactly one per event; `UNIQUE (stream_id, version)` makes a lost race
//! between two writers surface as a version conflict even if the explicit
//! precondition check were bypassed.
//!
//! Reads are paginated through [`EventCursor`]: `next_page(cursor)` returns
//! a batch and the cursor for the following batch, or `None` when done.

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::StoredEventBody;
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::sync::Arc;
use tracing::debug;

/// One persisted event
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub stream_id: String,
    pub version: u64,
    pub event_type: String,
    pub payload: StoredEventBody,
    pub timestamp: u64,
}

/// Position in a stream: the next page starts after `after_version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    pub stream_id: String,
    pub after_version: u64,
    pub batch_size: usize,
}

impl EventCursor {
    pub fn new(stream_id: impl Into<String>, after_version: u64, batch_size: usize) -> Self {
        Self {
            stream_id: stream_id.into(),
            after_version,
            batch_size: batch_size.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<StoredEvent>,
    /// `None` once the stream is exhausted
    pub next: Option<EventCursor>,
}

#[derive(Clone)]
pub struct EventLog {
    db: Arc<Database>,
}

impl EventLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append `events` as versions `expected_version + 1 ..`.
    ///
    /// Fails with [`StoreError::VersionConflict`] if the stream is no longer
    /// at `expected_version`. Returns the new stream version.
    pub fn append(
        &self,
        stream_id: &str,
        expected_version: u64,
        events: &[StoredEventBody],
        timestamp: u64,
    ) -> Result<u64> {
        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;

        let actual: u64 = tx
            .query_row(
                "SELECT MAX(version) FROM events WHERE stream_id = ?1",
                [stream_id],
                |row| row.get::<_, Option<i64>>(0),
            )?
            .unwrap_or(0) as u64;

        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                stream_id: stream_id.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let mut version = expected_version;
        for event in events {
            version += 1;
            tx.execute(
                r#"
                INSERT INTO events (stream_id, version, event_type, payload, timestamp)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    stream_id,
                    version as i64,
                    event.kind(),
                    serde_json::to_string(event)?,
                    timestamp as i64,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref failure, _)
                    if failure.code == ErrorCode::ConstraintViolation =>
                {
                    StoreError::VersionConflict {
                        stream_id: stream_id.to_string(),
                        expected: expected_version,
                        actual: version,
                    }
                }
                e => StoreError::DatabaseError(e),
            })?;
        }

        tx.commit()?;

        debug!(
            stream_id = %stream_id,
            from = expected_version,
            to = version,
            "Events appended"
        );
        Ok(version)
    }

    /// Fetch one page of events
    pub fn next_page(&self, cursor: &EventCursor) -> Result<EventPage> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT version, event_type, payload, timestamp
            FROM events
            WHERE stream_id = ?1 AND version > ?2
            ORDER BY version ASC
            LIMIT ?3
            "#,
        )?;

        let rows = stmt
            .query_map(
                params![
                    cursor.stream_id,
                    cursor.after_version as i64,
                    cursor.batch_size as i64
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)? as u64,
                    ))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(rows.len());
        for (version, event_type, payload, timestamp) in rows {
            events.push(StoredEvent {
                stream_id: cursor.stream_id.clone(),
                version,
                event_type,
                payload: serde_json::from_str(&payload)?,
                timestamp,
            });
        }

        let next = match events.last() {
            Some(last) if events.len() == cursor.batch_size => Some(EventCursor {
                stream_id: cursor.stream_id.clone(),
                after_version: last.version,
                batch_size: cursor.batch_size,
            }),
            _ => None,
        };

        Ok(EventPage { events, next })
    }

    /// Current version of a stream (0 if it has no events)
    pub fn current_version(&self, stream_id: &str) -> Result<u64> {
        let version: Option<i64> = self
            .db
            .conn()?
            .query_row(
                "SELECT MAX(version) FROM events WHERE stream_id = ?1",
                [stream_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(version.unwrap_or(0) as u64)
    }

    pub fn count(&self, stream_id: &str) -> Result<u64> {
        let count: i64 = self.db.conn()?.query_row(
            "SELECT COUNT(*) FROM events WHERE stream_id = ?1",
            [stream_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Raw payload text of a stream, in order
    pub fn raw_payloads(&self, stream_id: &str) -> Result<Vec<String>> {
        let conn = self.db.conn()?;
        let mut stmt =
            conn.prepare("SELECT payload FROM events WHERE stream_id = ?1 ORDER BY version ASC")?;
        let payloads = stmt
            .query_map([stream_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomark_core::Coordinate;
    use geomark_domain::MarkerEvent;

    fn log() -> EventLog {
        EventLog::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    fn imported(i: i64) -> StoredEventBody {
        MarkerEvent::Imported {
            position: Coordinate::new(8.4, 49.0).unwrap(),
            score: Some(i),
        }
    }

    #[test]
    fn test_append_assigns_consecutive_versions() {
        let log = log();
        assert_eq!(log.append("s", 0, &[imported(1), imported(2)], 10).unwrap(), 2);
        assert_eq!(log.append("s", 2, &[imported(3)], 11).unwrap(), 3);
        assert_eq!(log.current_version("s").unwrap(), 3);
        assert_eq!(log.current_version("other").unwrap(), 0);
        assert_eq!(log.count("s").unwrap(), 3);
    }

    #[test]
    fn test_stale_expected_version_conflicts() {
        let log = log();
        log.append("s", 0, &[imported(1)], 10).unwrap();
        let err = log.append("s", 0, &[imported(2)], 11).unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(log.count("s").unwrap(), 1);
    }

    #[test]
    fn test_cursor_pagination() {
        let log = log();
        let events: Vec<_> = (0..7).map(imported).collect();
        log.append("s", 0, &events, 10).unwrap();

        let mut cursor = Some(EventCursor::new("s", 2, 2));
        let mut versions = Vec::new();
        let mut pages = 0;
        while let Some(c) = cursor {
            let page = log.next_page(&c).unwrap();
            versions.extend(page.events.iter().map(|e| e.version));
            cursor = page.next;
            pages += 1;
        }
        assert_eq!(versions, vec![3, 4, 5, 6, 7]);
        assert_eq!(pages, 3);
    }

    #[test]
    fn test_exact_multiple_page_ends_with_empty_page() {
        let log = log();
        log.append("s", 0, &[imported(1), imported(2)], 10).unwrap();
        let page = log.next_page(&EventCursor::new("s", 0, 2)).unwrap();
        let next = page.next.unwrap();
        let last = log.next_page(&next).unwrap();
        assert!(last.events.is_empty());
        assert!(last.next.is_none());
    }
}
