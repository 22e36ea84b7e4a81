//! Marker domain for Geomark
//!
//! This crate contains pure domain logic with no I/O dependencies:
//! - Marker event definitions (closed tagged union)
//! - The `Marker` aggregate and its deterministic fold
//! - Score policy (vote weighting and clamping)

pub mod error;
pub mod event;
pub mod marker;
pub mod policy;

pub use error::{DomainError, Result};
pub use event::{DomainEvent, MarkerEvent, MarkerId, ReportCategory, SyncFields};
pub use marker::{Marker, MarkerState, ReportEntry, RECENT_REPORTS_CAPACITY};
pub use policy::ScorePolicy;
