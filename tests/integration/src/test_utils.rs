//! Test fixtures shared by the integration suites

use geomark_commands::{CommandContext, Outcome};
use geomark_core::{ActorId, GeomarkConfig, ManualClock};
use geomark_store::RecordingQueue;
use std::path::PathBuf;
use std::sync::{Arc, Once};

/// Karlsruhe palace square
pub const LON: f64 = 8.40395;
pub const LAT: f64 = 49.0092;

static TRACING: Once = Once::new();

/// Install a test subscriber once per process; honours `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A node backed by SQLite files in a scratch directory
pub struct TestNode {
    pub context: Arc<CommandContext>,
    pub clock: Arc<ManualClock>,
    pub queue: Arc<RecordingQueue>,
    pub dir: PathBuf,
}

impl TestNode {
    pub fn new() -> Self {
        init_tracing();
        let dir = std::env::temp_dir().join(format!("geomark_it_{}", uuid::Uuid::new_v4()));

        let mut config = GeomarkConfig::default();
        config.store.database_path = dir.join("geomark.db");
        config.pseudonym.database_path = dir.join("geomark-pii.db");
        config.pseudonym.master_key_hex = hex_key(7);

        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let queue = Arc::new(RecordingQueue::new());
        let context = CommandContext::open(&config, clock.clone(), queue.clone())
            .expect("Failed to open command context");

        Self {
            context: Arc::new(context),
            clock,
            queue,
            dir,
        }
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

fn hex_key(byte: u8) -> String {
    format!("{:02x}", byte).repeat(32)
}

pub fn actor(name: &str) -> ActorId {
    ActorId::new(name)
}

/// Marker id of a `Registered` outcome
pub fn registered_id(outcome: &Outcome) -> geomark_domain::MarkerId {
    match outcome {
        Outcome::Registered { marker_id } => *marker_id,
        other => panic!("expected a registration, got {:?}", other),
    }
}
