//! Reconstruction of payloads from fragments held in the shared store.
//!
//! [`Reassembler`] is stateless: everything it needs lives in the store under
//! keys derived from the operation's identity. Reassembly is attempted on
//! demand. Nothing calls it when the last fragment lands, so callers poll,
//! either directly through [`Reassembler::poll_until_complete`] or by letting
//! the reassembly worker redeliver the header until the operation is ready.

use std::{sync::Arc, time::Duration};

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    backoff::BackoffConfig,
    checksum::Checksum,
    fragment::{
        Fragment,
        FragmentIndex,
        Nonce,
        OperationIdentity,
        ReassemblyHeader,
        ReassemblyOperation,
        ValidationError,
    },
    keys::{KeyDeriver, StoreKey},
    metrics,
    store::{Store, StoreError, decode_counter},
    wire::WireRecord,
};

/// Largest buffer reserved up front, whatever size the header claims.
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

/// Failures reported by [`Reassembler::reassemble`].
#[derive(Debug, Error)]
pub enum ReassemblyError {
    /// The header is structurally invalid.
    #[error("malformed header: {0}")]
    Malformed(#[from] ValidationError),
    /// No ingest counter exists for the operation.
    #[error("no ingest counter for operation {nonce}/{checksum}")]
    CounterMissing { nonce: Nonce, checksum: Checksum },
    /// The ingest counter holds something other than an integer.
    #[error("ingest counter at {key} is unreadable")]
    CounterUnreadable { key: StoreKey },
    /// Some fragments have not been ingested yet.
    #[error(
        "{ingested} of {cardinality} fragments ingested; {} still missing",
        missing(.ingested, .cardinality)
    )]
    Incomplete { ingested: i64, cardinality: u32 },
    /// The counter says complete but a fragment record is absent.
    #[error("fragment {index} is not in the store")]
    FragmentMissing { index: FragmentIndex },
    /// A stored fragment record could not be decoded.
    #[error("stored fragment {index} could not be decoded: {source}")]
    Decode {
        index: FragmentIndex,
        #[source]
        source: DecodeError,
    },
    /// A stored fragment does not belong in its slot or fails its checksum.
    #[error("stored fragment {index} is corrupt: {reason}")]
    FragmentCorrupt {
        index: FragmentIndex,
        reason: String,
    },
    /// Fragment payloads do not add up to the header's size.
    #[error("fragments hold {actual} bytes, header declares {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    /// The assembled payload does not hash to the header's checksum.
    #[error("reassembled payload checksum {actual} does not match {expected}")]
    ChecksumMismatch { expected: Checksum, actual: Checksum },
    /// The header could not be encoded for the header cache.
    #[error("failed to encode header: {0}")]
    Encode(#[from] EncodeError),
    /// The store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn missing(ingested: &i64, cardinality: &u32) -> i64 { i64::from(*cardinality) - *ingested }

impl ReassemblyError {
    /// Whether the operation is merely still in flight.
    #[must_use]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::Incomplete { .. } | Self::CounterMissing { .. })
    }

    /// Whether a later attempt could succeed without a new broadcast.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_not_ready() || matches!(self, Self::Store(_) | Self::FragmentMissing { .. })
    }

    fn outcome(&self) -> &'static str {
        if self.is_not_ready() {
            "incomplete"
        } else if matches!(self, Self::ChecksumMismatch { .. }) {
            "checksum"
        } else {
            "failed"
        }
    }
}

/// Reassembles operations from fragments persisted by ingestors.
#[derive(Debug)]
pub struct Reassembler<S> {
    store: Arc<S>,
    keys: KeyDeriver,
    ttl: Option<Duration>,
}

impl<S: Store> Reassembler<S> {
    /// Create a reassembler reading from `store` with keys from `keys`.
    #[must_use]
    pub fn new(store: Arc<S>, keys: KeyDeriver) -> Self {
        Self {
            store,
            keys,
            ttl: None,
        }
    }

    /// Bound how long cached headers are retained.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Read the operation's ingest counter.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::CounterMissing`] when the counter does not
    /// exist, [`ReassemblyError::CounterUnreadable`] when it holds a
    /// non-integer, and [`ReassemblyError::Store`] on store failure.
    pub async fn ingested_count(&self, identity: &OperationIdentity) -> Result<i64, ReassemblyError> {
        let key = self.keys.ingest_count_key(identity);
        let Some(raw) = self.store.get(&key).await? else {
            return Err(ReassemblyError::CounterMissing {
                nonce: identity.nonce(),
                checksum: identity.checksum(),
            });
        };
        decode_counter(&raw).ok_or(ReassemblyError::CounterUnreadable { key })
    }

    /// Reassemble `operation`, attaching the verified payload on success.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::Incomplete`] or
    /// [`ReassemblyError::CounterMissing`] while fragments are still in
    /// flight; callers should retry these. Any other variant reports a store
    /// failure or an integrity problem with the stored fragments.
    pub async fn reassemble(&self, operation: &mut ReassemblyOperation) -> Result<(), ReassemblyError> {
        let result = self.reassemble_inner(operation).await;
        metrics::inc_reassemblies(match &result {
            Ok(()) => "complete",
            Err(err) => err.outcome(),
        });
        result
    }

    async fn reassemble_inner(
        &self,
        operation: &mut ReassemblyOperation,
    ) -> Result<(), ReassemblyError> {
        let identity = operation.identity()?;
        let header = operation.header();
        let cardinality = header.cardinality;

        let ingested = self.ingested_count(&identity).await?;
        let remaining = i64::from(cardinality) - ingested;
        if remaining > 0 {
            debug!(
                nonce = %identity.nonce(),
                ingested,
                cardinality,
                "reassembly attempted before all fragments were ingested"
            );
            return Err(ReassemblyError::Incomplete {
                ingested,
                cardinality,
            });
        }
        if remaining < 0 {
            warn!(
                nonce = %identity.nonce(),
                ingested,
                cardinality,
                "ingest counter exceeds cardinality"
            );
        }

        let payload = self.collect(&identity, header).await?;
        let actual = Checksum::compute(&payload);
        if actual != identity.checksum() {
            return Err(ReassemblyError::ChecksumMismatch {
                expected: identity.checksum(),
                actual,
            });
        }

        info!(
            nonce = %identity.nonce(),
            checksum = %actual,
            cardinality,
            size = header.size,
            "operation reassembled"
        );
        operation.attach_payload(payload);
        Ok(())
    }

    async fn collect(
        &self,
        identity: &OperationIdentity,
        header: &ReassemblyHeader,
    ) -> Result<Vec<u8>, ReassemblyError> {
        let mismatch = |actual: u64| ReassemblyError::SizeMismatch {
            expected: header.size,
            actual,
        };
        let size = usize::try_from(header.size).map_err(|_| mismatch(0))?;
        let mut payload = Vec::with_capacity(size.min(MAX_PREALLOCATION));

        for index in FragmentIndex::all(header.cardinality) {
            let fragment = self.load_fragment(identity, header, index).await?;
            let end = payload.len() + fragment.payload.len();
            if end > size {
                return Err(mismatch(end as u64));
            }
            payload.extend_from_slice(&fragment.payload);
        }

        if payload.len() != size {
            return Err(mismatch(payload.len() as u64));
        }
        Ok(payload)
    }

    async fn load_fragment(
        &self,
        identity: &OperationIdentity,
        header: &ReassemblyHeader,
        index: FragmentIndex,
    ) -> Result<Fragment, ReassemblyError> {
        let key = self.keys.persistence_key(identity, index);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or(ReassemblyError::FragmentMissing { index })?;
        let fragment =
            Fragment::from_wire(&raw).map_err(|source| ReassemblyError::Decode { index, source })?;

        let corrupt = |reason: String| ReassemblyError::FragmentCorrupt { index, reason };
        let checksums = fragment
            .validate()
            .map_err(|err| corrupt(err.to_string()))?;
        if fragment.index != index
            || fragment.nonce != identity.nonce()
            || fragment.cardinality != header.cardinality
            || checksums.reassembled != identity.checksum()
        {
            return Err(corrupt(format!(
                "record belongs to fragment {} of operation {}/{}",
                fragment.index, fragment.nonce, checksums.reassembled
            )));
        }
        if !checksums.fragment.verify(&fragment.payload) {
            return Err(corrupt("payload does not match its checksum".to_owned()));
        }
        Ok(fragment)
    }

    /// Retry [`Self::reassemble`] while the operation is not ready.
    ///
    /// Waits according to `backoff` between attempts and gives up after
    /// `max_attempts`, returning the last error.
    ///
    /// # Errors
    ///
    /// Returns the first error that is not a "not ready" condition, or the
    /// last "not ready" error once the attempts are exhausted.
    pub async fn poll_until_complete(
        &self,
        operation: &mut ReassemblyOperation,
        backoff: BackoffConfig,
        max_attempts: u32,
    ) -> Result<(), ReassemblyError> {
        let backoff = backoff.normalized();
        let mut attempt = 1;
        loop {
            match self.reassemble(operation).await {
                Err(err) if err.is_not_ready() && attempt < max_attempts => {
                    sleep(backoff.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Cache `header` under its identity so other processes can look it up.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] if the header is malformed, cannot be
    /// encoded, or the store rejects the write.
    pub async fn cache_header(&self, header: &ReassemblyHeader) -> Result<(), ReassemblyError> {
        let identity = header.identity()?;
        self.store
            .set(&self.keys.header_key(&identity), header.to_wire()?, self.ttl)
            .await?;
        Ok(())
    }

    /// Fetch a header previously stored by [`Self::cache_header`].
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError::Store`] on store failure and
    /// [`ReassemblyError::Decode`] if the cached bytes are not a header.
    pub async fn cached_header(
        &self,
        identity: &OperationIdentity,
    ) -> Result<Option<ReassemblyHeader>, ReassemblyError> {
        let Some(raw) = self.store.get(&self.keys.header_key(identity)).await? else {
            return Ok(None);
        };
        ReassemblyHeader::from_wire(&raw)
            .map(Some)
            .map_err(|source| ReassemblyError::Decode {
                index: FragmentIndex::zero(),
                source,
            })
    }
}
