use geomark_domain::{DomainError, MarkerId};
use geomark_pseudonym::PseudonymError;
use thiserror::Error;

/// Errors that can occur in store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Another writer appended first; reload and retry
    #[error("Version conflict on stream {stream_id}: expected {expected}, found {actual}")]
    VersionConflict {
        stream_id: String,
        expected: u64,
        actual: u64,
    },

    /// Tokenization or detokenization failed; fatal for the operation
    #[error("Pseudonymization failed: {0}")]
    Pseudonym(#[from] PseudonymError),

    /// The read model lacks a row an earlier save should have written
    #[error("Read model has no document for marker {marker_id}")]
    InconsistentReadModel { marker_id: MarkerId },

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Stored data is invalid: {0}")]
    Corrupt(String),

    #[error("Queue unavailable: {0}")]
    Queue(String),

    #[error("Database connection lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
