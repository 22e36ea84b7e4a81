//! Uniform optimistic-concurrency retry.
//!
//! Every handler runs its load -> validate -> mutate -> save body through
//! [`retry_on_conflict`]. A version conflict re-executes the whole body from
//! a fresh load, so the intent is re-validated against the winning writer's
//! state. Any other error is returned immediately.

use crate::error::{CommandError, Result};
use tracing::warn;

pub fn retry_on_conflict<T>(retries: u32, mut body: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match body() {
            Err(CommandError::Store(e)) if e.is_version_conflict() => {
                if attempt > retries {
                    warn!(attempts = attempt, "Version conflict persisted, giving up");
                    return Err(CommandError::VersionConflict { attempts: attempt });
                }
                warn!(attempt, error = %e, "Version conflict, reloading");
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomark_domain::MarkerId;
    use geomark_store::StoreError;

    fn conflict() -> CommandError {
        CommandError::Store(StoreError::VersionConflict {
            stream_id: "s".to_string(),
            expected: 1,
            actual: 2,
        })
    }

    #[test]
    fn test_recovers_within_budget() {
        let mut calls = 0;
        let result = retry_on_conflict(3, || {
            calls += 1;
            if calls < 3 {
                Err(conflict())
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_after_budget() {
        let mut calls = 0;
        let result: Result<()> = retry_on_conflict(2, || {
            calls += 1;
            Err(conflict())
        });
        assert!(matches!(result, Err(CommandError::VersionConflict { attempts: 3 })));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = retry_on_conflict(5, || {
            calls += 1;
            Err(CommandError::NotFound(MarkerId::new()))
        });
        assert!(matches!(result, Err(CommandError::NotFound(_))));
        assert_eq!(calls, 1);
    }
}
