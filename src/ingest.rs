//! Verification and durable ingestion of received fragments.
//!
//! [`Ingestor::ingest`] checks a fragment, persists its encoded record under
//! its per-index key and advances the owning operation's shared counter with
//! the store's atomic increment. Nothing is written for a fragment that fails
//! validation or verification.
//!
//! With redelivery deduplication enabled, a per-index marker counter guards
//! the shared counter: only the delivery that moves the marker from zero to
//! one advances the count, so a fragment redelivered by the bus is persisted
//! again (same key, same bytes) but counted once.

use std::{sync::Arc, time::Duration};

use bincode::error::EncodeError;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    checksum::Checksum,
    fragment::{Fragment, FragmentIndex, Nonce, OperationIdentity, ValidationError},
    keys::{KeyDeriver, StoreKey},
    metrics,
    store::{Store, StoreError, decode_counter, encode_counter},
    wire::WireRecord,
};

/// Failures reported by [`Ingestor::ingest`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// The fragment is structurally invalid.
    #[error("malformed fragment: {0}")]
    Malformed(#[from] ValidationError),
    /// The payload does not hash to the fragment's checksum.
    #[error("fragment {index} of operation {nonce} failed verification")]
    ChecksumMismatch { nonce: Nonce, index: FragmentIndex },
    /// The fragment could not be serialized for persistence.
    #[error("failed to encode fragment: {0}")]
    Encode(#[from] EncodeError),
    /// The store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Whether delivering the same message again could succeed.
    ///
    /// Store failures are transient. A checksum mismatch may stem from
    /// corruption in transit, so another copy of the message may verify.
    /// Malformed records never improve on redelivery.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::ChecksumMismatch { .. })
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::ChecksumMismatch { .. } => "checksum",
            Self::Encode(_) => "encode",
            Self::Store(_) => "store",
        }
    }
}

/// Outcome of a successful ingestion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ingested {
    /// Index of the ingested fragment.
    pub index: FragmentIndex,
    /// Value of the operation's ingest counter after this fragment.
    pub ingested: i64,
    /// Number of fragments in the operation.
    pub cardinality: u32,
    /// Whether the fragment had already been counted.
    pub duplicate: bool,
}

impl Ingested {
    /// Report whether this ingestion brought the operation to completion.
    ///
    /// Only the delivery that moves the counter onto the cardinality reports
    /// completion, so at most one ingesting process observes it.
    #[must_use]
    pub fn completes_operation(&self) -> bool {
        !self.duplicate && self.ingested == i64::from(self.cardinality)
    }
}

/// Verifies fragments and records them in the shared store.
#[derive(Debug)]
pub struct Ingestor<S> {
    store: Arc<S>,
    keys: KeyDeriver,
    ttl: Option<Duration>,
    dedupe_redeliveries: bool,
}

impl<S: Store> Ingestor<S> {
    /// Create an ingestor writing to `store` with keys from `keys`.
    ///
    /// Redelivery deduplication is enabled by default.
    #[must_use]
    pub fn new(store: Arc<S>, keys: KeyDeriver) -> Self {
        Self {
            store,
            keys,
            ttl: None,
            dedupe_redeliveries: true,
        }
    }

    /// Bound how long persisted fragments are retained.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Toggle per-index deduplication of the ingest counter.
    ///
    /// When disabled every verified delivery advances the counter, so bus
    /// redeliveries can push it beyond the cardinality.
    #[must_use]
    pub fn dedupe_redeliveries(mut self, enabled: bool) -> Self {
        self.dedupe_redeliveries = enabled;
        self
    }

    /// Borrow the key deriver.
    #[must_use]
    pub fn keys(&self) -> &KeyDeriver { &self.keys }

    /// Verify, persist and count `fragment`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Malformed`] or [`IngestError::ChecksumMismatch`]
    /// without touching the store, and [`IngestError::Store`] if persisting
    /// or counting fails. A persistence failure leaves the counter untouched.
    pub async fn ingest(&self, fragment: &Fragment) -> Result<Ingested, IngestError> {
        let result = self.ingest_inner(fragment).await;
        match &result {
            Ok(ingested) if ingested.duplicate => metrics::inc_duplicate_fragments(),
            Ok(_) => metrics::inc_ingested_fragments(),
            Err(err) => metrics::inc_rejected_fragments(err.reason()),
        }
        result
    }

    async fn ingest_inner(&self, fragment: &Fragment) -> Result<Ingested, IngestError> {
        let checksums = fragment.validate()?;
        if !checksums.fragment.verify(&fragment.payload) {
            warn!(
                nonce = %fragment.nonce,
                index = %fragment.index,
                expected = %checksums.fragment,
                actual = %Checksum::compute(&fragment.payload),
                "fragment failed verification"
            );
            return Err(IngestError::ChecksumMismatch {
                nonce: fragment.nonce,
                index: fragment.index,
            });
        }

        let identity = fragment.identity()?;
        let record = fragment.to_wire()?;
        self.store
            .set(
                &self.keys.persistence_key(&identity, fragment.index),
                record,
                self.ttl,
            )
            .await?;

        let counter = self.keys.ingest_count_key(&identity);
        let (ingested, duplicate) = if self.dedupe_redeliveries {
            self.count_once(&identity, fragment.index, &counter).await?
        } else {
            (self.store.increment(&counter).await?, false)
        };

        let outcome = Ingested {
            index: fragment.index,
            ingested,
            cardinality: fragment.cardinality,
            duplicate,
        };
        if outcome.completes_operation() {
            info!(
                nonce = %fragment.nonce,
                checksum = %checksums.reassembled,
                cardinality = fragment.cardinality,
                "all fragments ingested"
            );
        } else {
            debug!(
                nonce = %fragment.nonce,
                index = %fragment.index,
                ingested,
                cardinality = fragment.cardinality,
                duplicate,
                "fragment ingested"
            );
        }
        Ok(outcome)
    }

    /// Advance `counter` unless the marker for `index` shows the fragment was
    /// already counted. Returns the counter value and whether this delivery
    /// was a duplicate.
    ///
    /// A failed counter increment releases the marker again so a redelivery
    /// can claim it.
    async fn count_once(
        &self,
        identity: &OperationIdentity,
        index: FragmentIndex,
        counter: &StoreKey,
    ) -> Result<(i64, bool), IngestError> {
        let marker = self.keys.ingest_marker_key(identity, index);
        if self.store.increment(&marker).await? > 1 {
            let current = self.store.get(counter).await?;
            if let Some(ingested) = current.as_deref().and_then(decode_counter) {
                return Ok((ingested, true));
            }
            warn!(
                nonce = %identity.nonce(),
                %index,
                "fragment marked as counted but the ingest counter is absent; counting it"
            );
        }

        match self.store.increment(counter).await {
            Ok(ingested) => Ok((ingested, false)),
            Err(err) => {
                if let Err(release) = self.store.set(&marker, encode_counter(0), None).await {
                    warn!(
                        nonce = %identity.nonce(),
                        %index,
                        error = %release,
                        "failed to release redelivery marker"
                    );
                }
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests;
