use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// Quorum not reached or validity window exhausted; retryable
    #[error("Could not acquire locks {keys} ({granted}/{required} nodes granted)")]
    NotAcquired {
        keys: String,
        granted: usize,
        required: usize,
    },

    /// Release found the lock gone on every node (expired or reclaimed)
    #[error("Lock {owner} is no longer held")]
    NotHeld { owner: String },

    #[error("No lock keys given")]
    NoKeys,

    #[error("Lock node {0} state poisoned")]
    Poisoned(usize),
}

pub type Result<T> = std::result::Result<T, LockError>;
