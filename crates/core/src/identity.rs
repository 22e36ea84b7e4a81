//! Actor identities and fingerprints.
//!
//! An [`ActorId`] is the raw, personally identifying reference to a
//! participant. It only ever reaches durable storage encrypted inside the PII
//! vault. Everything else (credibility records, vote ledger rows, logs) keys
//! on the keyed BLAKE3 [`Fingerprinter::fingerprint`] instead.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const FINGERPRINT_CONTEXT: &str = "geomark 2024-01 actor fingerprint";

/// Raw actor identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Derives stable, non-reversible fingerprints of actor identities
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Fingerprinter {
    key: [u8; 32],
}

impl Fingerprinter {
    /// Derive a fingerprint key from the deployment master key
    pub fn new(master_key: &[u8; 32]) -> Self {
        Self {
            key: blake3::derive_key(FINGERPRINT_CONTEXT, master_key),
        }
    }

    /// Build from a hex encoded 32-byte master key
    pub fn from_hex(master_key_hex: &str) -> Result<Self> {
        Ok(Self::new(&decode_key(master_key_hex)?))
    }

    /// Hex encoded keyed BLAKE3 hash of the identity
    pub fn fingerprint(&self, actor: &ActorId) -> String {
        hex::encode(blake3::keyed_hash(&self.key, actor.as_str().as_bytes()).as_bytes())
    }
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter").finish_non_exhaustive()
    }
}

/// Decode a hex encoded 32-byte key
pub fn decode_key(key_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(key_hex.trim()).map_err(|e| CoreError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| CoreError::InvalidKey(format!("expected 32 bytes, got {}", b.len())))
}
