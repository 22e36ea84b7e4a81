//! Reversible, erasable pseudonymization of actor identities.
//!
//! Actor references in events are replaced by random tokens before they hit
//! durable storage. A token resolves to its data through the vault until the
//! authority (the actor the token was minted for) is erased; from then on
//! every token minted for that actor is permanently unresolvable, while the
//! events that mention it stay byte-for-byte unchanged.

pub mod error;
pub mod vault;

pub use error::{PseudonymError, Result};
pub use vault::PiiVault;

use geomark_core::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Opaque reference to a row in the PII vault
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PiiToken(String);

impl PiiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PiiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tokenization service consumed by the event store
pub trait Pseudonymizer: Send + Sync {
    /// Mint a fresh token bound to `authority` that resolves to `data`
    fn tokenize(&self, authority: &ActorId, data: &serde_json::Value) -> Result<PiiToken>;

    /// Resolve a token. `Ok(None)` means the token was erased (or never existed).
    fn detokenize(&self, token: &PiiToken) -> Result<Option<serde_json::Value>>;

    /// Resolve many tokens; unresolvable tokens are absent from the result
    fn detokenize_many(&self, tokens: &[PiiToken]) -> Result<HashMap<PiiToken, serde_json::Value>> {
        let mut resolved = HashMap::with_capacity(tokens.len());
        for token in tokens {
            if let Some(data) = self.detokenize(token)? {
                resolved.insert(token.clone(), data);
            }
        }
        Ok(resolved)
    }

    /// Delete specific tokens that are no longer referenced; returns the
    /// number deleted
    fn discard(&self, tokens: &[PiiToken]) -> Result<usize>;

    /// Delete every token minted for `authority`; returns the number deleted
    fn erase_authority(&self, authority: &ActorId) -> Result<usize>;
}

/// Tokenize an actor reference
pub fn tokenize_actor(pseudonymizer: &dyn Pseudonymizer, actor: &ActorId) -> Result<PiiToken> {
    pseudonymizer.tokenize(actor, &serde_json::json!({ "actor": actor }))
}

/// Extract the actor from resolved token data
pub fn actor_from_data(data: &serde_json::Value) -> Option<ActorId> {
    data.get("actor")
        .and_then(|v| v.as_str())
        .map(ActorId::new)
}
