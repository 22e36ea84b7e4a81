//! Behavioural statistics kept per actor.
//!
//! Intervals are smoothed with an exponentially weighted moving average
//! seeded with the first observed sample, so a new actor does not start out
//! looking suspiciously fast.

use crate::movement;
use geomark_core::Coordinate;
use serde::{Deserialize, Serialize};

/// Smoothing factor for interaction, voting and registration intervals
pub const INTERVAL_ALPHA: f64 = 0.1;

/// Smoothing factor for the unrealistic-movement indicator
pub const MOVEMENT_ALPHA: f64 = 0.2;

pub const MS_PER_DAY: u64 = 24 * 3_600_000;

/// `old * (1 - alpha) + sample * alpha`, or `sample` when there is no history
pub fn ewma(old: Option<f64>, sample: f64, alpha: f64) -> f64 {
    match old {
        Some(old) => old * (1.0 - alpha) + sample * alpha,
        None => sample,
    }
}

/// Counters for one kind of action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStats {
    pub total: u64,
    pub last_at_ms: Option<u64>,
    pub avg_interval_secs: Option<f64>,
    /// Start of the current 24h budget window
    pub window_started_ms: u64,
    /// Actions inside the current window
    pub window_count: u32,
}

impl ActionStats {
    pub fn record(&mut self, at_ms: u64) {
        if let Some(last) = self.last_at_ms {
            let interval = at_ms.saturating_sub(last) as f64 / 1_000.0;
            self.avg_interval_secs = Some(ewma(self.avg_interval_secs, interval, INTERVAL_ALPHA));
        }
        self.last_at_ms = Some(at_ms);
        self.total += 1;

        if self.window_count == 0 || at_ms.saturating_sub(self.window_started_ms) >= MS_PER_DAY {
            self.window_started_ms = at_ms;
            self.window_count = 0;
        }
        self.window_count += 1;
    }

    /// Actions counted against the budget window that is live at `now_ms`
    pub fn in_window(&self, now_ms: u64) -> u32 {
        if now_ms.saturating_sub(self.window_started_ms) >= MS_PER_DAY {
            0
        } else {
            self.window_count
        }
    }
}

/// Last observed interaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub at_ms: u64,
    pub position: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behaviour {
    /// When the identity was first seen; drives the identity-age penalty
    pub first_seen_ms: u64,
    pub last_sighting: Option<Sighting>,
    pub interactions: u64,
    pub avg_interaction_interval_secs: Option<f64>,
    pub unrealistic_movements: u64,
    /// EWMA of the 0/1 unrealistic-movement indicator
    pub movement_ewma: Option<f64>,
    pub upvotes: u64,
    pub voting: ActionStats,
    pub registration: ActionStats,
    pub alteration: ActionStats,
}

impl Behaviour {
    pub fn new(first_seen_ms: u64) -> Self {
        Self {
            first_seen_ms,
            last_sighting: None,
            interactions: 0,
            avg_interaction_interval_secs: None,
            unrealistic_movements: 0,
            movement_ewma: None,
            upvotes: 0,
            voting: ActionStats::default(),
            registration: ActionStats::default(),
            alteration: ActionStats::default(),
        }
    }

    /// Record that the actor did something at `position`
    pub fn record_interaction(&mut self, at_ms: u64, position: Coordinate) {
        if let Some(last) = self.last_sighting {
            let interval = at_ms.saturating_sub(last.at_ms) as f64 / 1_000.0;
            self.avg_interaction_interval_secs = Some(ewma(
                self.avg_interaction_interval_secs,
                interval,
                INTERVAL_ALPHA,
            ));

            let unrealistic =
                movement::is_unrealistic(&last.position, last.at_ms, &position, at_ms);
            if unrealistic {
                self.unrealistic_movements += 1;
            }
            let sample = if unrealistic { 1.0 } else { 0.0 };
            self.movement_ewma = Some(ewma(self.movement_ewma, sample, MOVEMENT_ALPHA));
        }
        self.last_sighting = Some(Sighting { at_ms, position });
        self.interactions += 1;
    }

    pub fn record_vote(&mut self, at_ms: u64, upvote: bool) {
        self.voting.record(at_ms);
        if upvote {
            self.upvotes += 1;
        }
    }

    pub fn record_registration(&mut self, at_ms: u64) {
        self.registration.record(at_ms);
    }

    pub fn record_alteration(&mut self, at_ms: u64) {
        self.alteration.record(at_ms);
    }

    pub fn total_actions(&self) -> u64 {
        self.voting.total + self.registration.total + self.alteration.total
    }

    /// Identity age in fractional days
    pub fn age_days(&self, now_ms: u64) -> f64 {
        now_ms.saturating_sub(self.first_seen_ms) as f64 / MS_PER_DAY as f64
    }
}
