//! Self-describing fragment records.

use bincode::{Decode, Encode};

use super::{ChecksumField, FragmentIndex, Nonce, OperationIdentity, ValidationError};
use crate::{
    checksum::Checksum,
    wire::{MAGIC_LEN, WireRecord},
};

/// One chunk of a fragmented payload.
///
/// Each fragment repeats its operation's cardinality, nonce and whole-payload
/// checksum so that an ingesting process needs nothing but the fragment
/// itself. Checksums stay as raw bytes on the wire; [`Self::validate`] turns
/// them into typed digests.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Fragment {
    /// Zero-based slot within the operation.
    pub index: FragmentIndex,
    /// Number of fragments composing the operation.
    pub cardinality: u32,
    /// Operation nonce.
    pub nonce: Nonce,
    /// 128-bit digest of the complete payload.
    pub reassembled_checksum: Vec<u8>,
    /// 128-bit digest of [`Self::payload`].
    pub checksum: Vec<u8>,
    /// Declared length of [`Self::payload`].
    pub payload_size: u64,
    /// The chunk's bytes.
    pub payload: Vec<u8>,
}

/// Typed checksums recovered from a structurally valid fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentChecksums {
    /// Digest the fragment claims for its own payload.
    pub fragment: Checksum,
    /// Digest of the operation's complete payload.
    pub reassembled: Checksum,
}

impl Fragment {
    /// Check every structural invariant of the record.
    ///
    /// Checksum widths are checked first so that a fragment with a missing
    /// or truncated digest is always reported as malformed.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first violated invariant.
    pub fn validate(&self) -> Result<FragmentChecksums, ValidationError> {
        let fragment = typed_checksum(&self.checksum, ChecksumField::Fragment)?;
        let reassembled = typed_checksum(&self.reassembled_checksum, ChecksumField::Reassembled)?;
        if self.cardinality == 0 {
            return Err(ValidationError::ZeroCardinality);
        }
        if !self.index.is_within(self.cardinality) {
            return Err(ValidationError::IndexOutOfRange {
                index: self.index,
                cardinality: self.cardinality,
            });
        }
        if u64::try_from(self.payload.len()).ok() != Some(self.payload_size) {
            return Err(ValidationError::PayloadSizeMismatch {
                declared: self.payload_size,
                actual: self.payload.len(),
            });
        }
        Ok(FragmentChecksums {
            fragment,
            reassembled,
        })
    }

    /// Return the fragment-scoped identity.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the reassembled checksum is malformed.
    pub fn identity(&self) -> Result<OperationIdentity, ValidationError> {
        let reassembled = typed_checksum(&self.reassembled_checksum, ChecksumField::Reassembled)?;
        Ok(OperationIdentity::fragment(
            self.nonce,
            reassembled,
            self.index,
        ))
    }
}

impl WireRecord for Fragment {
    const MAGIC: [u8; MAGIC_LEN] = *b"FCFR";
}

fn typed_checksum(raw: &[u8], field: ChecksumField) -> Result<Checksum, ValidationError> {
    Checksum::try_from(raw).map_err(|source| ValidationError::ChecksumLength { field, source })
}
