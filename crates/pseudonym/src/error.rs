use thiserror::Error;

/// Errors that can occur in vault operations
#[derive(Debug, Error)]
pub enum PseudonymError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Ciphertext failed authentication; the row was tampered with or the
    /// master key is wrong. Never treated as an erased token.
    #[error("Corrupt vault entry for token {token}")]
    Corrupt { token: String },

    #[error("Invalid key material: {0}")]
    InvalidKey(#[from] geomark_core::CoreError),

    #[error("Vault connection lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PseudonymError>;
