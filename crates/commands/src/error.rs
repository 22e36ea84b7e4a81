//! Command errors and their public surface.
//!
//! Business rejections keep their own stable code. Everything unexpected
//! collapses into `INTERNAL_ERROR` before crossing the system boundary.

use geomark_core::CoreError;
use geomark_credibility::{CredibilityError, Throttle};
use geomark_domain::{DomainError, MarkerId};
use geomark_lock::LockError;
use geomark_pseudonym::PseudonymError;
use geomark_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Marker {0} not found")]
    NotFound(MarkerId),

    #[error("Target is {distance_m:.1}m away, reach is {limit_m:.1}m")]
    OutOfReach { distance_m: f64, limit_m: f64 },

    #[error("Alteration rejected: {0}")]
    AlterationConflict(String),

    #[error("Throttled: {0:?}")]
    Throttled(Throttle),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Concurrent modification persisted after {attempts} attempts")]
    VersionConflict { attempts: u32 },

    #[error("Lock unavailable: {0}")]
    LockUnavailable(#[from] LockError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Credibility error: {0}")]
    Credibility(#[from] CredibilityError),

    #[error("Pseudonymization error: {0}")]
    Pseudonym(#[from] PseudonymError),

    #[error("Invariant violated: {0}")]
    Domain(#[from] DomainError),

    #[error("Configuration error: {0}")]
    Config(CoreError),
}

/// Error as shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicError {
    pub code: String,
    pub message: String,
}

impl CommandError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::NotFound(_) => "NOT_FOUND",
            CommandError::OutOfReach { .. } => "OUT_OF_REACH",
            CommandError::AlterationConflict(_) => "ALTERATION_CONFLICT",
            CommandError::Throttled(_) => "THROTTLED",
            CommandError::InvalidInput(_) => "INVALID_INPUT",
            CommandError::VersionConflict { .. } => "VERSION_CONFLICT",
            CommandError::Store(e) if e.is_version_conflict() => "VERSION_CONFLICT",
            CommandError::LockUnavailable(_) => "LOCK_UNAVAILABLE",
            CommandError::Store(_)
            | CommandError::Credibility(_)
            | CommandError::Pseudonym(_)
            | CommandError::Domain(_)
            | CommandError::Config(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_internal(&self) -> bool {
        self.code() == "INTERNAL_ERROR"
    }

    /// Convert for the system boundary; internal detail is logged, not leaked
    pub fn to_public(&self) -> PublicError {
        let message = if self.is_internal() {
            error!(error = %self, "Internal error");
            "An internal error occurred".to_string()
        } else if let CommandError::LockUnavailable(_) = self {
            "The area is busy, try again".to_string()
        } else {
            self.to_string()
        };
        PublicError {
            code: self.code().to_string(),
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
