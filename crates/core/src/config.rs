//! Configuration management for Geomark.
//!
//! Every section has a `Default` carrying the reference constants, so a
//! config file only needs to name what it overrides.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Development-only master key. Deployments must override it.
pub const DEV_MASTER_KEY_HEX: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeomarkConfig {
    pub store: StoreConfig,
    pub pseudonym: PseudonymConfig,
    pub locks: LockConfig,
    pub markers: MarkerConfig,
    pub credibility: CredibilityConfig,
    pub commands: CommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file holding events, snapshots, read model and vote ledger
    pub database_path: PathBuf,
    /// A snapshot is written whenever a save crosses a multiple of this
    pub snapshot_interval: u64,
    /// Events fetched per cursor page during load
    pub load_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/geomark.db"),
            snapshot_interval: 5,
            load_batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PseudonymConfig {
    /// Separate SQLite file for the PII vault
    pub database_path: PathBuf,
    /// Hex encoded 32-byte master key
    pub master_key_hex: String,
}

impl Default for PseudonymConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/geomark-pii.db"),
            master_key_hex: DEV_MASTER_KEY_HEX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl_ms: u64,
    pub acquire_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry_jitter_ms: u64,
    pub quorum_nodes: usize,
    pub geohash_precision: usize,
    /// Fraction of the TTL assumed lost to clock drift between lock nodes
    pub clock_drift_factor: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5_000,
            acquire_attempts: 4,
            retry_delay_ms: 50,
            retry_jitter_ms: 50,
            quorum_nodes: 3,
            geohash_precision: 8,
            clock_drift_factor: 0.01,
        }
    }
}

/// Vote weight granted from a credibility threshold upwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteWeight {
    pub min_credibility: u8,
    pub weight: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Two markers closer than this describe the same real-world thing
    pub same_marker_radius_m: f64,
    /// Maximum distance between an actor and the marker they act on
    pub reach_radius_m: f64,
    /// Maximum drift a single reposition may apply
    pub max_reposition_m: f64,
    pub score_min: i64,
    pub score_max: i64,
    pub vote_cooldown_secs: u64,
    /// Distinct reports of one category that mark a marker for deletion
    pub report_threshold: usize,
    /// Score at or below which a marker is marked for deletion
    pub deletion_score_threshold: i64,
    /// Ascending by `min_credibility`
    pub vote_weights: Vec<VoteWeight>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            same_marker_radius_m: 10.0,
            reach_radius_m: 100.0,
            max_reposition_m: 50.0,
            score_min: -100,
            score_max: 1_000,
            vote_cooldown_secs: 24 * 3600,
            report_threshold: 3,
            deletion_score_threshold: -5,
            vote_weights: vec![
                VoteWeight { min_credibility: 0, weight: 1 },
                VoteWeight { min_credibility: 25, weight: 2 },
                VoteWeight { min_credibility: 50, weight: 3 },
                VoteWeight { min_credibility: 75, weight: 4 },
                VoteWeight { min_credibility: 95, weight: 5 },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityConfig {
    /// Daily registration budget at credibility 0
    pub registration_daily_min: u32,
    /// Daily registration budget at credibility 100
    pub registration_daily_max: u32,
    /// Cooldown between registrations at credibility 0
    pub registration_cooldown_max_secs: u64,
    /// Cooldown between registrations at credibility 100
    pub registration_cooldown_min_secs: u64,
    pub min_reposition_credibility: u8,
}

impl Default for CredibilityConfig {
    fn default() -> Self {
        Self {
            registration_daily_min: 3,
            registration_daily_max: 30,
            registration_cooldown_max_secs: 300,
            registration_cooldown_min_secs: 10,
            min_reposition_credibility: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Extra attempts after an optimistic version conflict
    pub conflict_retries: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self { conflict_retries: 3 }
    }
}

impl GeomarkConfig {
    /// Load and validate a TOML config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject incoherent settings
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CoreError::InvalidConfig(msg.to_string()));

        if self.store.snapshot_interval == 0 {
            return invalid("store.snapshot_interval must be positive");
        }
        if self.store.load_batch_size == 0 {
            return invalid("store.load_batch_size must be positive");
        }
        crate::identity::decode_key(&self.pseudonym.master_key_hex)?;
        if self.locks.ttl_ms == 0 {
            return invalid("locks.ttl_ms must be positive");
        }
        if self.locks.acquire_attempts == 0 {
            return invalid("locks.acquire_attempts must be positive");
        }
        if self.locks.quorum_nodes == 0 {
            return invalid("locks.quorum_nodes must be positive");
        }
        if !(1..=12).contains(&self.locks.geohash_precision) {
            return invalid("locks.geohash_precision must be within 1..=12");
        }
        if !(0.0..0.5).contains(&self.locks.clock_drift_factor) {
            return invalid("locks.clock_drift_factor must be within [0, 0.5)");
        }
        if self.markers.score_min >= self.markers.score_max {
            return invalid("markers.score_min must be below markers.score_max");
        }
        if self.markers.same_marker_radius_m <= 0.0 || self.markers.reach_radius_m <= 0.0 {
            return invalid("marker radii must be positive");
        }
        if self.markers.report_threshold == 0 {
            return invalid("markers.report_threshold must be positive");
        }
        let weights = &self.markers.vote_weights;
        if weights.is_empty() || weights[0].min_credibility != 0 {
            return invalid("markers.vote_weights must start at credibility 0");
        }
        if weights
            .windows(2)
            .any(|w| w[1].min_credibility <= w[0].min_credibility || w[1].weight < w[0].weight)
        {
            return invalid("markers.vote_weights must be strictly ascending and monotonic");
        }
        if self.credibility.registration_daily_min > self.credibility.registration_daily_max {
            return invalid("credibility registration limits are inverted");
        }
        if self.credibility.registration_cooldown_min_secs
            > self.credibility.registration_cooldown_max_secs
        {
            return invalid("credibility registration cooldowns are inverted");
        }
        Ok(())
    }

    /// True when the development master key is still configured
    pub fn uses_dev_key(&self) -> bool {
        self.pseudonym.master_key_hex == DEV_MASTER_KEY_HEX
    }
}
