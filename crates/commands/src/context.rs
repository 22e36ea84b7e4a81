//! Composition root.
//!
//! Every service a handler needs is constructed once and owned here; handlers
//! borrow them through `&self`. There is no global state.

use crate::error::{CommandError, Result};
use geomark_core::config::{GeomarkConfig, MarkerConfig};
use geomark_core::{identity, Clock, Coordinate, Fingerprinter};
use geomark_credibility::{CredibilityEngine, CredibilityStore};
use geomark_domain::{MarkerId, ScorePolicy};
use geomark_lock::{LockManager, LockPrimitive, QuorumLock};
use geomark_pseudonym::{PiiVault, Pseudonymizer};
use geomark_store::{Database, MarkerDocument, MarkerRepository, NearbyMarker, Queue};
use std::sync::Arc;
use tracing::info;

pub struct CommandContext {
    pub(crate) repository: MarkerRepository,
    pub(crate) credibility: CredibilityEngine,
    pub(crate) locks: LockManager,
    pub(crate) queue: Arc<dyn Queue>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) policy: ScorePolicy,
    pub(crate) markers: MarkerConfig,
    pub(crate) conflict_retries: u32,
    pub(crate) geohash_precision: usize,
}

/// Storage backends a context is assembled from
pub struct Backends {
    pub database: Arc<Database>,
    pub pseudonymizer: Arc<dyn Pseudonymizer>,
    pub credibility: Arc<CredibilityStore>,
    pub locks: Arc<dyn LockPrimitive>,
}

impl CommandContext {
    /// Open file-backed stores as configured
    pub fn open(config: &GeomarkConfig, clock: Arc<dyn Clock>, queue: Arc<dyn Queue>) -> Result<Self> {
        config.validate().map_err(CommandError::Config)?;
        let key = identity::decode_key(&config.pseudonym.master_key_hex).map_err(CommandError::Config)?;

        let backends = Backends {
            database: Arc::new(Database::open(&config.store.database_path)?),
            pseudonymizer: Arc::new(PiiVault::open(&config.pseudonym.database_path, &key)?),
            credibility: Arc::new(CredibilityStore::open(&config.store.database_path)?),
            locks: Arc::new(QuorumLock::in_process(
                config.locks.quorum_nodes,
                clock.clone(),
                config.locks.clock_drift_factor,
            )),
        };
        Self::assemble(config, &key, backends, clock, queue)
    }

    /// Volatile stores, for tests and dry runs
    pub fn in_memory(config: &GeomarkConfig, clock: Arc<dyn Clock>, queue: Arc<dyn Queue>) -> Result<Self> {
        config.validate().map_err(CommandError::Config)?;
        let key = identity::decode_key(&config.pseudonym.master_key_hex).map_err(CommandError::Config)?;

        let backends = Backends {
            database: Arc::new(Database::open_in_memory()?),
            pseudonymizer: Arc::new(PiiVault::open_in_memory(&key)?),
            credibility: Arc::new(CredibilityStore::open_in_memory()?),
            locks: Arc::new(QuorumLock::in_process(
                config.locks.quorum_nodes,
                clock.clone(),
                config.locks.clock_drift_factor,
            )),
        };
        Self::assemble(config, &key, backends, clock, queue)
    }

    pub fn assemble(
        config: &GeomarkConfig,
        master_key: &[u8; 32],
        backends: Backends,
        clock: Arc<dyn Clock>,
        queue: Arc<dyn Queue>,
    ) -> Result<Self> {
        let fingerprinter = Fingerprinter::new(master_key);
        let repository = MarkerRepository::new(
            backends.database,
            backends.pseudonymizer,
            fingerprinter.clone(),
            queue.clone(),
            clock.clone(),
            &config.store,
        );
        let credibility =
            CredibilityEngine::new(backends.credibility, fingerprinter, &config.credibility);

        info!(
            quorum_nodes = config.locks.quorum_nodes,
            snapshot_interval = config.store.snapshot_interval,
            "Command context ready"
        );

        Ok(Self {
            repository,
            credibility,
            locks: LockManager::new(backends.locks, &config.locks),
            queue,
            clock,
            policy: ScorePolicy::from(&config.markers),
            markers: config.markers.clone(),
            conflict_retries: config.commands.conflict_retries,
            geohash_precision: config.locks.geohash_precision,
        })
    }

    pub fn repository(&self) -> &MarkerRepository {
        &self.repository
    }

    pub fn credibility(&self) -> &CredibilityEngine {
        &self.credibility
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Read-model document of a marker
    pub fn marker(&self, id: MarkerId) -> Result<Option<MarkerDocument>> {
        Ok(self.repository.read_model().get(id)?)
    }

    /// Read-model documents within `radius_m`, nearest first
    pub fn markers_near(&self, center: &Coordinate, radius_m: f64) -> Result<Vec<NearbyMarker>> {
        Ok(self.repository.read_model().query_nearby(center, radius_m)?)
    }
}
