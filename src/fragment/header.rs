//! Reassembly headers and the local operations that own them.

use bincode::{Decode, Encode};

use super::{ChecksumField, Nonce, OperationIdentity, ValidationError};
use crate::{
    checksum::Checksum,
    wire::{MAGIC_LEN, WireRecord},
};

/// Metadata describing how a payload was fragmented.
///
/// The header travels on the reassembly subject and never carries payload
/// bytes. The checksum is kept as raw bytes so a record with a mis-sized
/// digest can still be decoded and then rejected by [`Self::validate`].
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct ReassemblyHeader {
    /// Number of fragments the payload was split into.
    pub cardinality: u32,
    /// 128-bit digest of the complete payload.
    pub checksum: Vec<u8>,
    /// Per-broadcast nonce.
    pub nonce: Nonce,
    /// Length of the complete payload in bytes.
    pub size: u64,
}

impl ReassemblyHeader {
    /// Check the structural invariants and return the typed checksum.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ChecksumLength`] when the checksum is not
    /// 128 bits and [`ValidationError::ZeroCardinality`] when the header
    /// claims no fragments.
    pub fn validate(&self) -> Result<Checksum, ValidationError> {
        let checksum = Checksum::try_from(self.checksum.as_slice()).map_err(|source| {
            ValidationError::ChecksumLength {
                field: ChecksumField::Header,
                source,
            }
        })?;
        if self.cardinality == 0 {
            return Err(ValidationError::ZeroCardinality);
        }
        Ok(checksum)
    }

    /// Return the operation identity after validating the header.
    ///
    /// # Errors
    ///
    /// Propagates any failure from [`Self::validate`].
    pub fn identity(&self) -> Result<OperationIdentity, ValidationError> {
        let checksum = self.validate()?;
        Ok(OperationIdentity::operation(self.nonce, checksum))
    }
}

impl WireRecord for ReassemblyHeader {
    const MAGIC: [u8; MAGIC_LEN] = *b"FCHD";
}

/// A reassembly header plus, where known locally, the payload it describes.
///
/// The payload is present after fragmentation and after a successful
/// reassembly. Operations built from a received header start without one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassemblyOperation {
    header: ReassemblyHeader,
    payload: Option<Vec<u8>>,
}

impl ReassemblyOperation {
    /// Wrap a header received from the transport.
    #[must_use]
    pub fn new(header: ReassemblyHeader) -> Self {
        Self {
            header,
            payload: None,
        }
    }

    pub(crate) fn with_payload(header: ReassemblyHeader, payload: Vec<u8>) -> Self {
        Self {
            header,
            payload: Some(payload),
        }
    }

    /// Borrow the header.
    #[must_use]
    pub fn header(&self) -> &ReassemblyHeader { &self.header }

    /// Number of fragments composing the operation.
    #[must_use]
    pub fn cardinality(&self) -> u32 { self.header.cardinality }

    /// Operation nonce.
    #[must_use]
    pub fn nonce(&self) -> Nonce { self.header.nonce }

    /// Length of the complete payload.
    #[must_use]
    pub fn size(&self) -> u64 { self.header.size }

    /// Borrow the payload if it is known locally.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> { self.payload.as_deref() }

    /// Consume the operation, returning the payload if known locally.
    #[must_use]
    pub fn into_payload(self) -> Option<Vec<u8>> { self.payload }

    /// Return the operation identity.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the header is malformed.
    pub fn identity(&self) -> Result<OperationIdentity, ValidationError> {
        self.header.identity()
    }

    pub(crate) fn attach_payload(&mut self, payload: Vec<u8>) { self.payload = Some(payload); }
}

impl From<ReassemblyHeader> for ReassemblyOperation {
    fn from(header: ReassemblyHeader) -> Self { Self::new(header) }
}
