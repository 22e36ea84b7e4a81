//! SQLite-backed PII vault.
//!
//! Each row holds:
//! - token: 32 random bytes, hex encoded (primary key)
//! - authority: keyed fingerprint of the actor the token was minted for
//! - nonce / ciphertext: ChaCha20-Poly1305 encryption of the JSON data,
//!   authenticated together with the token so rows cannot be swapped
//! - created_at: Unix milliseconds
//!
//! Erasure deletes rows by authority fingerprint. Nothing else references
//! the raw identity, so deleted rows are unrecoverable.

use crate::error::{PseudonymError, Result};
use crate::{PiiToken, Pseudonymizer};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use geomark_core::{current_timestamp_ms, ActorId, Fingerprinter};
use rand::{rngs::OsRng, RngCore};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

const PAYLOAD_KEY_CONTEXT: &str = "geomark 2024-01 pii payload";
const TOKEN_BYTES: usize = 32;
const NONCE_SIZE: usize = 12;

/// Encrypted token store
pub struct PiiVault {
    conn: Mutex<Connection>,
    cipher: ChaCha20Poly1305,
    fingerprinter: Fingerprinter,
}

impl PiiVault {
    /// Create or open a vault at the specified path
    pub fn open(path: impl AsRef<Path>, master_key: &[u8; 32]) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening PII vault");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::with_connection(conn, master_key)
    }

    /// Open a vault from a hex encoded master key
    pub fn open_with_hex_key(path: impl AsRef<Path>, master_key_hex: &str) -> Result<Self> {
        let mut key = geomark_core::identity::decode_key(master_key_hex)?;
        let vault = Self::open(path, &key);
        key.zeroize();
        vault
    }

    /// Volatile vault, for tests and tooling
    pub fn open_in_memory(master_key: &[u8; 32]) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, master_key)
    }

    fn with_connection(conn: Connection, master_key: &[u8; 32]) -> Result<Self> {
        Self::init_schema(&conn)?;

        let mut payload_key = blake3::derive_key(PAYLOAD_KEY_CONTEXT, master_key);
        let cipher = ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&payload_key));
        payload_key.zeroize();

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
            fingerprinter: Fingerprinter::new(master_key),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pii_tokens (
                token TEXT PRIMARY KEY,
                authority TEXT NOT NULL,
                nonce BLOB NOT NULL,
                ciphertext BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pii_authority ON pii_tokens(authority);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| PseudonymError::LockPoisoned)
    }

    /// Number of live tokens minted for an authority
    pub fn token_count(&self, authority: &ActorId) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM pii_tokens WHERE authority = ?1",
            [self.fingerprinter.fingerprint(authority)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn encrypt(&self, token: &str, plaintext: &[u8]) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: token.as_bytes(),
                },
            )
            .map_err(|e| PseudonymError::Encryption(e.to_string()))?;

        Ok((nonce_bytes, ciphertext))
    }

    fn decrypt(&self, token: &str, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(PseudonymError::Corrupt {
                token: token.to_string(),
            });
        }
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: token.as_bytes(),
                },
            )
            .map_err(|_| PseudonymError::Corrupt {
                token: token.to_string(),
            })
    }

    /// Execute raw SQL for testing purposes only
    #[doc(hidden)]
    pub fn __test_execute_raw_sql(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<usize> {
        Ok(self.conn()?.execute(sql, params)?)
    }
}

impl Pseudonymizer for PiiVault {
    fn tokenize(&self, authority: &ActorId, data: &serde_json::Value) -> Result<PiiToken> {
        let mut token_bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);

        let mut plaintext = serde_json::to_vec(data)?;
        let encrypted = self.encrypt(&token, &plaintext);
        plaintext.zeroize();
        let (nonce, ciphertext) = encrypted?;

        self.conn()?.execute(
            r#"
            INSERT INTO pii_tokens (token, authority, nonce, ciphertext, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                token,
                self.fingerprinter.fingerprint(authority),
                nonce.to_vec(),
                ciphertext,
                current_timestamp_ms() as i64,
            ],
        )?;

        Ok(PiiToken::new(token))
    }

    fn detokenize(&self, token: &PiiToken) -> Result<Option<serde_json::Value>> {
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .conn()?
            .query_row(
                "SELECT nonce, ciphertext FROM pii_tokens WHERE token = ?1",
                [token.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((nonce, ciphertext)) = row else {
            debug!("Token does not resolve; treating as anonymised");
            return Ok(None);
        };

        let mut plaintext = self.decrypt(token.as_str(), &nonce, &ciphertext)?;
        let data = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        Ok(Some(data?))
    }

    fn discard(&self, tokens: &[PiiToken]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM pii_tokens WHERE token = ?1")?;
            for token in tokens {
                deleted += stmt.execute([token.as_str()])?;
            }
        }
        tx.commit()?;
        debug!(requested = tokens.len(), deleted, "Discarded PII tokens");
        Ok(deleted)
    }

    fn erase_authority(&self, authority: &ActorId) -> Result<usize> {
        let fingerprint = self.fingerprinter.fingerprint(authority);
        let deleted = self
            .conn()?
            .execute("DELETE FROM pii_tokens WHERE authority = ?1", [&fingerprint])?;

        if deleted == 0 {
            warn!(authority = %fingerprint, "Erasure requested for authority without tokens");
        } else {
            info!(authority = %fingerprint, deleted, "Erased PII tokens for authority");
        }
        Ok(deleted)
    }
}
