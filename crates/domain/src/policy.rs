//! Score policy: vote impact and score bounds.
//!
//! The policy is evaluated when a vote is recorded and the resulting
//! effective delta is stored in the event, so replaying history never
//! depends on the configuration in force at replay time.

use geomark_core::config::MarkerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScorePolicy {
    pub min: i64,
    pub max: i64,
    /// `(min_credibility, weight)` ascending
    weights: Vec<(u8, i64)>,
}

impl ScorePolicy {
    pub fn new(min: i64, max: i64, weights: Vec<(u8, i64)>) -> Self {
        Self { min, max, weights }
    }

    /// Vote impact for a voter of the given credibility.
    ///
    /// Monotonic non-decreasing in `credibility`.
    pub fn weight_for(&self, credibility: u8) -> i64 {
        self.weights
            .iter()
            .take_while(|(threshold, _)| *threshold <= credibility)
            .last()
            .map(|(_, weight)| *weight)
            .unwrap_or(1)
    }

    /// Delta that moves `score` by `requested` without leaving the range
    pub fn clamp_delta(&self, score: i64, requested: i64) -> i64 {
        self.clamp(score.saturating_add(requested)) - score
    }

    pub fn clamp(&self, score: i64) -> i64 {
        score.clamp(self.min, self.max)
    }
}

impl From<&MarkerConfig> for ScorePolicy {
    fn from(config: &MarkerConfig) -> Self {
        Self {
            min: config.score_min,
            max: config.score_max,
            weights: config
                .vote_weights
                .iter()
                .map(|w| (w.min_credibility, w.weight))
                .collect(),
        }
    }
}
