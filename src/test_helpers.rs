#![cfg(test)]
//! Test-only helpers shared by unit tests.

use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use rstest::fixture;

use crate::{
    fragment::{FragmentBatch, Fragmenter, Nonce},
    keys::{KeyDeriver, KeyPurpose, StoreKey},
    store::{MemoryStore, Store, StoreError},
};

pub const NAMESPACE: &str = "test";

/// A [`MemoryStore`] whose operations can be made to fail on demand.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_set: AtomicBool,
    fail_increment: Mutex<Option<(KeyPurpose, usize)>>,
    fail_get: AtomicBool,
}

impl FlakyStore {
    pub fn fail_set(&self, fail: bool) { self.fail_set.store(fail, Ordering::SeqCst); }

    /// Fail the next `times` increments of keys derived for `purpose`.
    pub fn fail_increment(&self, purpose: KeyPurpose, times: usize) {
        *self.fail_increment.lock().expect("flaky store lock") = Some((purpose, times));
    }

    pub fn fail_get(&self, fail: bool) { self.fail_get.store(fail, Ordering::SeqCst); }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StoreError> {
        Self::check(&self.fail_get)?;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &StoreKey,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        Self::check(&self.fail_set)?;
        self.inner.set(key, value, ttl).await
    }

    async fn increment(&self, key: &StoreKey) -> Result<i64, StoreError> {
        {
            let mut pending = self.fail_increment.lock().expect("flaky store lock");
            if let Some((purpose, remaining)) = pending.as_mut()
                && *remaining > 0
                && key.as_str().ends_with(&format!(".{}", purpose.suffix()))
            {
                *remaining -= 1;
                return Err(StoreError::Unavailable("injected failure".to_owned()));
            }
        }
        self.inner.increment(key).await
    }
}

#[fixture]
pub fn keys() -> KeyDeriver { KeyDeriver::new(NAMESPACE) }

#[fixture]
pub fn store() -> Arc<FlakyStore> { Arc::new(FlakyStore::default()) }

/// Fragment `payload` with a small chunk size and a fixed nonce.
pub fn batch(payload: &[u8], chunk_size: usize, nonce: u64) -> FragmentBatch {
    let chunk = std::num::NonZeroUsize::new(chunk_size).expect("non-zero chunk size");
    Fragmenter::new(chunk)
        .fragment_with_nonce(Nonce::new(nonce), payload)
        .expect("fragmentation succeeds")
}

/// Deterministic test payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).expect("fits in u8"))
        .collect()
}
