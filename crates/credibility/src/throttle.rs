//! Credibility-scaled rate limiting.
//!
//! Higher credibility buys a larger daily budget and a shorter cooldown.
//! Both scale linearly between the configured extremes.

use crate::behaviour::ActionStats;
use geomark_core::config::CredibilityConfig;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Throttle {
    Allowed,
    DailyLimit { limit: u32 },
    Cooldown { remaining_secs: u64 },
    InsufficientCredibility { required: u8, actual: u8 },
}

impl Throttle {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Throttle::Allowed)
    }
}

#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    daily_min: u32,
    daily_max: u32,
    cooldown_max_secs: u64,
    cooldown_min_secs: u64,
    min_alteration_credibility: u8,
}

impl ThrottlePolicy {
    pub fn new(config: &CredibilityConfig) -> Self {
        Self {
            daily_min: config.registration_daily_min,
            daily_max: config.registration_daily_max,
            cooldown_max_secs: config.registration_cooldown_max_secs,
            cooldown_min_secs: config.registration_cooldown_min_secs,
            min_alteration_credibility: config.min_reposition_credibility,
        }
    }

    pub fn daily_limit(&self, credibility: u8) -> u32 {
        let span = self.daily_max.saturating_sub(self.daily_min) as f64;
        self.daily_min + (span * fraction(credibility)).round() as u32
    }

    pub fn cooldown_secs(&self, credibility: u8) -> u64 {
        let span = self.cooldown_max_secs.saturating_sub(self.cooldown_min_secs) as f64;
        self.cooldown_max_secs - (span * fraction(credibility)).round() as u64
    }

    /// Gate one more action of the kind tracked by `stats`
    pub fn check(&self, stats: &ActionStats, credibility: u8, now_ms: u64) -> Throttle {
        let limit = self.daily_limit(credibility);
        if stats.in_window(now_ms) >= limit {
            return Throttle::DailyLimit { limit };
        }
        if let Some(last) = stats.last_at_ms {
            let elapsed_secs = now_ms.saturating_sub(last) / 1_000;
            let cooldown = self.cooldown_secs(credibility);
            if elapsed_secs < cooldown {
                return Throttle::Cooldown {
                    remaining_secs: cooldown - elapsed_secs,
                };
            }
        }
        Throttle::Allowed
    }

    /// Repositions additionally require a minimum credibility
    pub fn check_alteration(&self, stats: &ActionStats, credibility: u8, now_ms: u64) -> Throttle {
        if credibility < self.min_alteration_credibility {
            return Throttle::InsufficientCredibility {
                required: self.min_alteration_credibility,
                actual: credibility,
            };
        }
        self.check(stats, credibility, now_ms)
    }
}

fn fraction(credibility: u8) -> f64 {
    credibility.min(100) as f64 / 100.0
}
