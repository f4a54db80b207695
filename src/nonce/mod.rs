//! Anti-replay nonces
//!
//! A nonce is minted once per issued challenge, persisted before the
//! challenge leaves the server, and consumed exactly once during
//! validation. Concurrency safety of the whole subsystem rests on
//! `consume` being an atomic check-and-invalidate.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use thiserror::Error;

/// Default nonce validity window in seconds: ten ledgers at the network's
/// five-second close cadence.
pub const DEFAULT_NONCE_TTL_SECONDS: i64 = 50;

/// Nonce store errors
#[derive(Error, Debug)]
pub enum NonceError {
    #[error("nonce store failure: {0}")]
    Store(String),
}

/// Single-use nonce persistence.
///
/// `consume` must check and invalidate in one operation so that two
/// concurrent validations of the same challenge cannot both succeed.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Persist a freshly generated nonce.
    async fn store(&self, nonce: &str) -> Result<(), NonceError>;

    /// Atomically consume a nonce. Returns false when the nonce is
    /// unknown, already consumed, or expired.
    async fn consume(&self, nonce: &str) -> Result<bool, NonceError>;
}

/// Generate a nonce: 4 random bytes rendered as a decimal string.
pub fn generate_nonce() -> String {
    let mut buf = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut buf);
    u32::from_be_bytes(buf).to_string()
}

/// Mutex-held nonce store for tests and single-process deployments.
pub struct InMemoryNonceStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryNonceStore {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryNonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_TTL_SECONDS)
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn store(&self, nonce: &str) -> Result<(), NonceError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| NonceError::Store(e.to_string()))?;
        let now = Utc::now();
        // Drop anything already past its window while we hold the lock.
        entries.retain(|_, expires_at| *expires_at > now);
        entries.insert(nonce.to_string(), now + self.ttl);
        Ok(())
    }

    async fn consume(&self, nonce: &str) -> Result<bool, NonceError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| NonceError::Store(e.to_string()))?;
        match entries.remove(nonce) {
            Some(expires_at) => Ok(expires_at > Utc::now()),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_nonce_is_decimal_u32() {
        let nonce = generate_nonce();
        nonce.parse::<u32>().unwrap();
    }

    #[tokio::test]
    async fn test_nonce_is_single_use() {
        let store = InMemoryNonceStore::default();
        store.store("12345").await.unwrap();

        assert!(store.consume("12345").await.unwrap());
        assert!(!store.consume("12345").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_nonce_is_invalid() {
        let store = InMemoryNonceStore::default();
        assert!(!store.consume("67890").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_nonce_is_invalid() {
        let store = InMemoryNonceStore::new(-1);
        store.store("expired").await.unwrap();
        assert!(!store.consume("expired").await.unwrap());
    }
}
