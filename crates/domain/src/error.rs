//! Domain errors
//!
//! Pure domain errors with no infrastructure dependencies

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A mutator was called in a state where the fact cannot exist.
    /// Always a programming error in the caller.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid marker id: {0}")]
    InvalidMarkerId(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
