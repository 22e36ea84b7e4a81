//! Credibility scoring.
//!
//! The score starts at 100 and loses the sum of independent, individually
//! capped penalty terms. The result is clamped to [0, 100] and rounded.

use crate::behaviour::Behaviour;
use serde::Serialize;

const MAX_SCORE: f64 = 100.0;

// Unrealistic movement
const MOVEMENT_COUNT_FACTOR: f64 = 2.0;
const MOVEMENT_COUNT_CAP: f64 = 30.0;
const MOVEMENT_EWMA_FACTOR: f64 = 20.0;

// Interaction frequency
const FREQUENCY_MIN_SAMPLES: u64 = 5;
const FREQUENCY_FLOOR_SECS: f64 = 2.0;
const FREQUENCY_CEILING_SECS: f64 = 60.0;
const FREQUENCY_CAP: f64 = 20.0;

// Voting bias
const BIAS_MIN_VOTES: u64 = 10;
const BIAS_FACTOR: f64 = 80.0;
const BIAS_CAP: f64 = 20.0;

const REGISTRATION_WITHOUT_VOTING: f64 = 15.0;
const REGISTRATION_WITHOUT_VOTING_MIN: u64 = 3;

// Short-interval abuse
const VOTING_ABUSE_INTERVAL_SECS: f64 = 10.0;
const REGISTRATION_ABUSE_INTERVAL_SECS: f64 = 120.0;
const ABUSE_FACTOR: f64 = 5.0;
const ABUSE_CAP: f64 = 25.0;

// Low activity
const LOW_ACTIVITY_FEW: (u64, f64) = (3, 10.0);
const LOW_ACTIVITY_SOME: (u64, f64) = (10, 5.0);

// Identity age
const AGE_NEW_PENALTY: f64 = 30.0;
const AGE_YOUNG_PENALTY: f64 = 20.0;
const AGE_YOUNG_DAYS: f64 = 2.0;
const AGE_MATURE_DAYS: f64 = 28.0;

// Daily rates
const VOTE_RATE_THRESHOLD: f64 = 50.0;
const VOTE_RATE_SCALE: f64 = 10.0;
const REGISTRATION_RATE_THRESHOLD: f64 = 10.0;
const REGISTRATION_RATE_SCALE: f64 = 2.0;
const RATE_CAP: f64 = 20.0;

/// Individual penalty terms, exposed for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Penalties {
    pub movement: f64,
    pub interaction_frequency: f64,
    pub voting_bias: f64,
    pub registration_without_voting: f64,
    pub voting_abuse: f64,
    pub registration_abuse: f64,
    pub low_activity: f64,
    pub identity_age: f64,
    pub voting_rate: f64,
    pub registration_rate: f64,
}

impl Penalties {
    pub fn evaluate(behaviour: &Behaviour, now_ms: u64) -> Self {
        let age_days = behaviour.age_days(now_ms);
        Self {
            movement: movement(behaviour),
            interaction_frequency: interaction_frequency(behaviour),
            voting_bias: voting_bias(behaviour),
            registration_without_voting: registration_without_voting(behaviour),
            voting_abuse: abuse(
                behaviour.voting.total,
                behaviour.voting.avg_interval_secs,
                VOTING_ABUSE_INTERVAL_SECS,
            ),
            registration_abuse: abuse(
                behaviour.registration.total,
                behaviour.registration.avg_interval_secs,
                REGISTRATION_ABUSE_INTERVAL_SECS,
            ),
            low_activity: low_activity(behaviour),
            identity_age: identity_age(age_days),
            voting_rate: daily_rate(
                behaviour.voting.total,
                age_days,
                VOTE_RATE_THRESHOLD,
                VOTE_RATE_SCALE,
            ),
            registration_rate: daily_rate(
                behaviour.registration.total,
                age_days,
                REGISTRATION_RATE_THRESHOLD,
                REGISTRATION_RATE_SCALE,
            ),
        }
    }

    pub fn total(&self) -> f64 {
        self.movement
            + self.interaction_frequency
            + self.voting_bias
            + self.registration_without_voting
            + self.voting_abuse
            + self.registration_abuse
            + self.low_activity
            + self.identity_age
            + self.voting_rate
            + self.registration_rate
    }
}

/// Credibility in [0, 100]
pub fn score(behaviour: &Behaviour, now_ms: u64) -> u8 {
    let raw = MAX_SCORE - Penalties::evaluate(behaviour, now_ms).total();
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, MAX_SCORE).round() as u8
}

fn movement(b: &Behaviour) -> f64 {
    let count = b.unrealistic_movements as f64;
    let by_count = (MOVEMENT_COUNT_FACTOR * count * count).min(MOVEMENT_COUNT_CAP);
    by_count + MOVEMENT_EWMA_FACTOR * b.movement_ewma.unwrap_or(0.0).clamp(0.0, 1.0)
}

fn interaction_frequency(b: &Behaviour) -> f64 {
    if b.interactions < FREQUENCY_MIN_SAMPLES {
        return 0.0;
    }
    let Some(avg) = b.avg_interaction_interval_secs else {
        return 0.0;
    };
    if avg <= FREQUENCY_FLOOR_SECS {
        FREQUENCY_CAP
    } else if avg >= FREQUENCY_CEILING_SECS {
        0.0
    } else {
        FREQUENCY_CAP * (FREQUENCY_CEILING_SECS - avg) / (FREQUENCY_CEILING_SECS - FREQUENCY_FLOOR_SECS)
    }
}

fn voting_bias(b: &Behaviour) -> f64 {
    if b.voting.total < BIAS_MIN_VOTES {
        return 0.0;
    }
    let ratio = b.upvotes as f64 / b.voting.total as f64;
    (BIAS_FACTOR * (ratio - 0.5).powi(2)).min(BIAS_CAP)
}

fn registration_without_voting(b: &Behaviour) -> f64 {
    if b.registration.total >= REGISTRATION_WITHOUT_VOTING_MIN && b.voting.total == 0 {
        REGISTRATION_WITHOUT_VOTING
    } else {
        0.0
    }
}

/// Scaled by `ln(n + 1)` so one quick action weighs less than a pattern
fn abuse(count: u64, avg_interval_secs: Option<f64>, threshold_secs: f64) -> f64 {
    let Some(avg) = avg_interval_secs else {
        return 0.0;
    };
    if avg >= threshold_secs {
        return 0.0;
    }
    let shortness = 1.0 - avg.max(0.0) / threshold_secs;
    (shortness * ABUSE_FACTOR * ((count + 1) as f64).ln()).min(ABUSE_CAP)
}

fn low_activity(b: &Behaviour) -> f64 {
    let actions = b.total_actions();
    if actions < LOW_ACTIVITY_FEW.0 {
        LOW_ACTIVITY_FEW.1
    } else if actions < LOW_ACTIVITY_SOME.0 {
        LOW_ACTIVITY_SOME.1
    } else {
        0.0
    }
}

fn identity_age(age_days: f64) -> f64 {
    if age_days < AGE_YOUNG_DAYS {
        AGE_NEW_PENALTY - (AGE_NEW_PENALTY - AGE_YOUNG_PENALTY) * age_days / AGE_YOUNG_DAYS
    } else if age_days < AGE_MATURE_DAYS {
        AGE_YOUNG_PENALTY * (AGE_MATURE_DAYS - age_days) / (AGE_MATURE_DAYS - AGE_YOUNG_DAYS)
    } else {
        0.0
    }
}

fn daily_rate(count: u64, age_days: f64, threshold: f64, scale: f64) -> f64 {
    let rate = count as f64 / age_days.max(1.0);
    if rate <= threshold {
        return 0.0;
    }
    (((rate - threshold) / scale).powi(2)).min(RATE_CAP)
}
