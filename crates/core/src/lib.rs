//! Core functionality for the Geomark marker registry.
//!
//! This crate provides the fundamental types, traits, and utilities used
//! across the Geomark workspace: configuration, logging, geo primitives,
//! actor identities and clocks.

pub mod clock;
pub mod config;
pub mod error;
pub mod geo;
pub mod identity;
pub mod logging;

pub use clock::{current_timestamp_ms, Clock, ManualClock, SystemClock};
pub use config::GeomarkConfig;
pub use error::{CoreError, Result};
pub use geo::{geohash, geohash_cell_size, Coordinate, GeoBox, EARTH_RADIUS_M};
pub use identity::{ActorId, Fingerprinter};
