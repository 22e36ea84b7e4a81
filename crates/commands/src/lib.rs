//! Command handling for the marker registry.
//!
//! A [`CommandContext`] owns every service; [`CommandContext::execute`]
//! dispatches a [`Command`] to its handler and returns an [`Outcome`].
//! Failures convert to a [`PublicError`] at the boundary.

pub mod command;
pub mod context;
pub mod error;
pub mod handlers;
pub mod retry;

pub use command::{Command, ImportItem, ImportOutcome, Outcome, Register, Report, Reposition, Vote};
pub use context::{Backends, CommandContext};
pub use error::{CommandError, PublicError, Result};
pub use retry::retry_on_conflict;
