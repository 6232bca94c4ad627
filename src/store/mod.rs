//! Shared key-value store used for cross-process reassembly state.
//!
//! The [`Store`] trait is the seam to an external cache (Redis, Memcached or
//! similar). Its only coordination primitive is [`Store::increment`], which
//! must be atomic across every process sharing the store. Counters are kept
//! as ASCII decimal values so [`Store::get`] on a counter key returns the
//! same bytes a Redis `GET` would.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
use crate::keys::StoreKey;

/// Errors surfaced by a [`Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// [`Store::increment`] targeted a key holding a non-counter value.
    #[error("value at {key} is not an integer counter")]
    NotACounter { key: StoreKey },
    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Atomic key-value cache shared by every ingesting and reassembling process.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the value at `key`, or `None` if the key is absent or expired.
    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` at `key`, replacing any previous value.
    ///
    /// A `ttl` bounds how long the value is retained; `None` keeps it until
    /// the backend's own eviction policy removes it.
    async fn set(
        &self,
        key: &StoreKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Atomically add one to the counter at `key`, creating it at zero when
    /// absent, and return the new value.
    async fn increment(&self, key: &StoreKey) -> Result<i64, StoreError>;
}

/// Parse a counter value as written by [`Store::increment`].
///
/// Returns `None` if the bytes are not an ASCII decimal integer.
#[must_use]
pub fn decode_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Encode a counter value the way [`Store::increment`] stores it.
#[must_use]
pub fn encode_counter(value: i64) -> Vec<u8> { value.to_string().into_bytes() }
