//! In-process [`Store`] backed by a concurrent map.
//!
//! `MemoryStore` gives tests and single-host deployments the same semantics
//! the reassembly engine expects from an external cache: per-key expiry and
//! an increment that is atomic with respect to every other task holding the
//! same `Arc<MemoryStore>`. Expiry is measured with Tokio's clock so paused
//! test time controls it.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::time::Instant;

use super::{Store, StoreError, decode_counter, encode_counter};
use crate::keys::StoreKey;

#[derive(Clone, Debug)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(bytes: Vec<u8>, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            bytes,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool { self.expires_at.is_none_or(|at| at > now) }
}

/// Concurrent in-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<StoreKey, StoredValue>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of keys currently held, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, value| value.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|value| value.is_live(now))
            .map(|value| value.bytes.clone()))
    }

    async fn set(
        &self,
        key: &StoreKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.entries
            .insert(key.clone(), StoredValue::new(value, ttl, Instant::now()));
        Ok(())
    }

    async fn increment(&self, key: &StoreKey) -> Result<i64, StoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock for the whole read-modify-write.
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = if occupied.get().is_live(now) {
                    decode_counter(&occupied.get().bytes)
                        .ok_or_else(|| StoreError::NotACounter { key: key.clone() })?
                } else {
                    occupied.get_mut().expires_at = None;
                    0
                };
                let next = current.checked_add(1).ok_or_else(|| StoreError::NotACounter {
                    key: key.clone(),
                })?;
                occupied.get_mut().bytes = encode_counter(next);
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(encode_counter(1), None, now));
                Ok(1)
            }
        }
    }
}
