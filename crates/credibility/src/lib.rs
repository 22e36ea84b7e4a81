//! Credibility and anti-abuse engine.
//!
//! Every actor carries a 0-100 credibility rating derived from behavioural
//! statistics. The rating decides how much a vote moves a marker's score and
//! how tightly registrations and repositions are rate-limited.
//!
//! Records are keyed by the actor fingerprint, never by the raw identity.

pub mod behaviour;
pub mod engine;
pub mod error;
pub mod movement;
pub mod score;
pub mod store;
pub mod throttle;

pub use behaviour::{ewma, ActionStats, Behaviour, Sighting};
pub use engine::CredibilityEngine;
pub use error::{CredibilityError, Result};
pub use movement::{is_unrealistic, max_plausible_speed_kmh};
pub use score::{score, Penalties};
pub use store::{CredibilityRecord, CredibilityStore};
pub use throttle::{Throttle, ThrottlePolicy};
