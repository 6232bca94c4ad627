//! Outbound helper that splits payloads into checksummed fragments.
//!
//! [`Fragmenter`] chunks a payload into fixed-size slices, digests each slice
//! and the payload as a whole, and stamps everything with a fresh
//! [`Nonce`](crate::fragment::Nonce) so the resulting operation has a unique
//! identity in the shared store.

use std::num::NonZeroUsize;

use super::{
    Fragment,
    FragmentIndex,
    FragmentationError,
    Nonce,
    NonceSource,
    ReassemblyHeader,
    ReassemblyOperation,
};
use crate::{checksum::Checksum, wire::MAX_RECORD_LEN};

/// Largest chunk size whose encoded fragment record still decodes within
/// [`MAX_RECORD_LEN`]. The margin covers the record's fixed fields.
pub const MAX_CHUNK_SIZE: usize = MAX_RECORD_LEN - 256;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = match NonZeroUsize::new(4500) {
    Some(size) => size,
    None => unreachable!(),
};

/// Splits payloads into fragment-sized chunks.
#[derive(Debug)]
pub struct Fragmenter {
    chunk_size: NonZeroUsize,
    nonces: NonceSource,
}

impl Default for Fragmenter {
    fn default() -> Self { Self::new(DEFAULT_CHUNK_SIZE) }
}

impl Fragmenter {
    /// Create a fragmenter that caps fragment payloads at `chunk_size` bytes.
    #[must_use]
    pub const fn new(chunk_size: NonZeroUsize) -> Self {
        Self::with_nonce_source(chunk_size, NonceSource::new())
    }

    /// Create a fragmenter drawing nonces from `nonces`.
    #[must_use]
    pub const fn with_nonce_source(chunk_size: NonZeroUsize, nonces: NonceSource) -> Self {
        Self { chunk_size, nonces }
    }

    /// Return the configured chunk size.
    #[must_use]
    pub const fn chunk_size(&self) -> NonZeroUsize { self.chunk_size }

    /// Split `payload` into fragments under a freshly issued nonce.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::TooManyFragments`] if the payload needs
    /// more than `u32::MAX` fragments.
    pub fn fragment(
        &self,
        payload: impl AsRef<[u8]>,
    ) -> Result<FragmentBatch, FragmentationError> {
        self.fragment_with_nonce(self.nonces.next_nonce(), payload)
    }

    /// Split `payload` into fragments tagged with `nonce`.
    ///
    /// The whole-payload checksum is computed once up front. A payload
    /// shorter than the chunk size, including an empty one, yields a single
    /// fragment.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError::TooManyFragments`] if the payload needs
    /// more than `u32::MAX` fragments.
    pub fn fragment_with_nonce(
        &self,
        nonce: Nonce,
        payload: impl AsRef<[u8]>,
    ) -> Result<FragmentBatch, FragmentationError> {
        let payload = payload.as_ref();
        let total = payload.len();
        let chunk = self.chunk_size.get();
        let count = total.div_ceil(chunk).max(1);
        let cardinality = u32::try_from(count)
            .map_err(|_| FragmentationError::TooManyFragments { fragments: count })?;
        let checksum = Checksum::compute(payload);

        let mut fragments = Vec::with_capacity(count);
        for (position, index) in FragmentIndex::all(cardinality).enumerate() {
            let start = position * chunk;
            // Measured from `start` on every pass so a short tail cannot
            // underflow the remaining length.
            let remaining = total - start;
            let end = start + remaining.min(chunk);
            let bytes = payload[start..end].to_vec();
            fragments.push(Fragment {
                index,
                cardinality,
                nonce,
                reassembled_checksum: checksum.to_vec(),
                checksum: Checksum::compute(&bytes).to_vec(),
                payload_size: bytes.len() as u64,
                payload: bytes,
            });
        }

        let header = ReassemblyHeader {
            cardinality,
            checksum: checksum.to_vec(),
            nonce,
            size: total as u64,
        };
        Ok(FragmentBatch::new(
            ReassemblyOperation::with_payload(header, payload.to_vec()),
            fragments,
        ))
    }
}

/// An operation together with the fragments produced for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FragmentBatch {
    operation: ReassemblyOperation,
    fragments: Vec<Fragment>,
}

impl FragmentBatch {
    fn new(operation: ReassemblyOperation, fragments: Vec<Fragment>) -> Self {
        debug_assert!(!fragments.is_empty(), "fragment batches must not be empty");
        Self {
            operation,
            fragments,
        }
    }

    /// Borrow the operation, payload included.
    #[must_use]
    pub fn operation(&self) -> &ReassemblyOperation { &self.operation }

    /// Borrow the header that will be broadcast.
    #[must_use]
    pub fn header(&self) -> &ReassemblyHeader { self.operation.header() }

    /// Return the fragments in ascending index order.
    #[must_use]
    pub fn fragments(&self) -> &[Fragment] { self.fragments.as_slice() }

    /// Number of fragments in the batch.
    #[expect(
        clippy::len_without_is_empty,
        reason = "batches are guaranteed non-empty"
    )]
    #[must_use]
    pub fn len(&self) -> usize { self.fragments.len() }

    /// Consume the batch, returning the operation and its fragments.
    #[must_use]
    pub fn into_parts(self) -> (ReassemblyOperation, Vec<Fragment>) {
        (self.operation, self.fragments)
    }
}
