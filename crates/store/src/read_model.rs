//! Denormalised marker documents for queries.
//!
//! Refreshed on every save; eventually consistent with the event log.
//! Removed markers have no document.

use crate::database::Database;
use crate::error::{Result, StoreError};
use geomark_core::Coordinate;
use geomark_domain::{MarkerId, MarkerState};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDocument {
    pub id: MarkerId,
    pub position: Coordinate,
    pub score: i64,
    pub imported: bool,
    pub marked_for_deletion_at: Option<u64>,
    pub restored_from: Option<MarkerId>,
    pub version: u64,
}

impl<A> From<&MarkerState<A>> for MarkerDocument {
    fn from(state: &MarkerState<A>) -> Self {
        Self {
            id: state.id,
            position: state.position,
            score: state.score,
            imported: state.imported,
            marked_for_deletion_at: state.marked_for_deletion_at,
            restored_from: state.restored_from,
            version: state.version,
        }
    }
}

/// A document and its distance from the query point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyMarker {
    pub document: MarkerDocument,
    pub distance_m: f64,
}

const SELECT_COLUMNS: &str = "id, longitude, latitude, score, imported, \
                              marked_for_deletion_at, restored_from, version";

#[derive(Clone)]
pub struct ReadModel {
    db: Arc<Database>,
}

impl ReadModel {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn upsert(&self, doc: &MarkerDocument, updated_at: u64) -> Result<()> {
        self.db.conn()?.execute(
            r#"
            INSERT INTO markers (id, longitude, latitude, score, imported,
                                 marked_for_deletion_at, restored_from, version, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                longitude = excluded.longitude,
                latitude = excluded.latitude,
                score = excluded.score,
                imported = excluded.imported,
                marked_for_deletion_at = excluded.marked_for_deletion_at,
                restored_from = excluded.restored_from,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
            params![
                doc.id.to_string(),
                doc.position.longitude,
                doc.position.latitude,
                doc.score,
                doc.imported,
                doc.marked_for_deletion_at.map(|t| t as i64),
                doc.restored_from.map(|id| id.to_string()),
                doc.version as i64,
                updated_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Update an existing document; returns `false` if there was none
    pub fn update(&self, doc: &MarkerDocument, updated_at: u64) -> Result<bool> {
        let updated = self.db.conn()?.execute(
            r#"
            UPDATE markers SET
                longitude = ?2, latitude = ?3, score = ?4, imported = ?5,
                marked_for_deletion_at = ?6, restored_from = ?7, version = ?8,
                updated_at = ?9
            WHERE id = ?1
            "#,
            params![
                doc.id.to_string(),
                doc.position.longitude,
                doc.position.latitude,
                doc.score,
                doc.imported,
                doc.marked_for_deletion_at.map(|t| t as i64),
                doc.restored_from.map(|id| id.to_string()),
                doc.version as i64,
                updated_at as i64,
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn delete(&self, id: MarkerId) -> Result<bool> {
        let deleted = self
            .db
            .conn()?
            .execute("DELETE FROM markers WHERE id = ?1", [id.to_string()])?;
        Ok(deleted > 0)
    }

    pub fn get(&self, id: MarkerId) -> Result<Option<MarkerDocument>> {
        let conn = self.db.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM markers WHERE id = ?1", SELECT_COLUMNS),
                [id.to_string()],
                RawDocument::from_row,
            )
            .optional()?;
        raw.map(RawDocument::into_document).transpose()
    }

    /// Documents within `radius_m` of `center`, nearest first.
    ///
    /// A bounding box prefilter runs in SQL; the exact haversine check
    /// runs here.
    pub fn query_nearby(&self, center: &Coordinate, radius_m: f64) -> Result<Vec<NearbyMarker>> {
        let bounds = center.bounding_box(radius_m);
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM markers \
             WHERE latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4",
            SELECT_COLUMNS
        ))?;
        let mut raws = Vec::new();
        for (west, east) in bounds.longitude_ranges() {
            let rows = stmt
                .query_map(
                    params![bounds.south, bounds.north, west, east],
                    RawDocument::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            raws.extend(rows);
        }

        let mut nearby = Vec::new();
        for raw in raws {
            let document = raw.into_document()?;
            let distance_m = center.haversine_distance(&document.position);
            if distance_m <= radius_m {
                nearby.push(NearbyMarker {
                    document,
                    distance_m,
                });
            }
        }
        nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Ok(nearby)
    }

    /// Ids of markers marked for deletion at or before `cutoff_ms`
    pub fn marked_before(&self, cutoff_ms: u64) -> Result<Vec<MarkerId>> {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM markers WHERE marked_for_deletion_at IS NOT NULL \
             AND marked_for_deletion_at <= ?1 ORDER BY marked_for_deletion_at ASC",
        )?;
        let ids = stmt
            .query_map([cutoff_ms as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        ids.iter()
            .map(|id| id.parse().map_err(|e| StoreError::Corrupt(format!("{}", e))))
            .collect()
    }
}

struct RawDocument {
    id: String,
    longitude: f64,
    latitude: f64,
    score: i64,
    imported: bool,
    marked_for_deletion_at: Option<i64>,
    restored_from: Option<String>,
    version: i64,
}

impl RawDocument {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            longitude: row.get(1)?,
            latitude: row.get(2)?,
            score: row.get(3)?,
            imported: row.get(4)?,
            marked_for_deletion_at: row.get(5)?,
            restored_from: row.get(6)?,
            version: row.get(7)?,
        })
    }

    fn into_document(self) -> Result<MarkerDocument> {
        let corrupt = |e: geomark_domain::DomainError| StoreError::Corrupt(e.to_string());
        Ok(MarkerDocument {
            id: self.id.parse().map_err(corrupt)?,
            position: Coordinate {
                longitude: self.longitude,
                latitude: self.latitude,
            },
            score: self.score,
            imported: self.imported,
            marked_for_deletion_at: self.marked_for_deletion_at.map(|t| t as u64),
            restored_from: self
                .restored_from
                .map(|id| id.parse())
                .transpose()
                .map_err(corrupt)?,
            version: self.version as u64,
        })
    }
}
