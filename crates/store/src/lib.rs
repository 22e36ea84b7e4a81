//! Event store for Geomark markers.
//!
//! - [`EventLog`]: append-only streams with optimistic concurrency and a
//!   paginated cursor
//! - [`SnapshotRepository`]: periodic state materialisation
//! - [`ReadModel`]: denormalised documents for position queries
//! - [`VoteLedger`]: per-vote fact rows
//! - [`Queue`]: fire-and-forget notifications for downstream consumers
//! - [`MarkerRepository`]: `load` / `save` tying the above together, with
//!   actor references tokenized at the storage boundary

pub mod database;
pub mod error;
pub mod event_log;
pub mod queue;
pub mod read_model;
pub mod repository;
pub mod snapshots;
pub mod votes;

pub use database::Database;
pub use error::{Result, StoreError};
pub use event_log::{EventCursor, EventLog, EventPage, StoredEvent};
pub use queue::{ChannelQueue, Queue, QueuedMessage, RecordingQueue, CREDIBILITY_TOPIC, TILES_TOPIC};
pub use read_model::{MarkerDocument, NearbyMarker, ReadModel};
pub use repository::{ErasureReport, MarkerRepository};
pub use snapshots::{SnapshotRepository, SnapshotWrite};
pub use votes::{VoteDirection, VoteLedger, VoteRecord};

use geomark_domain::{MarkerEvent, MarkerState};
use geomark_pseudonym::PiiToken;

/// Event as persisted: actor references are vault tokens
pub type StoredEventBody = MarkerEvent<Option<PiiToken>>;

/// Snapshot as persisted
pub type StoredState = MarkerState<Option<PiiToken>>;
