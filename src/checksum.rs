//! Fixed-width content digests for fragments and reassembled payloads.
//!
//! Every checksum carried by a header or fragment is exactly
//! [`CHECKSUM_LEN`] bytes. The digest is the first 128 bits of the BLAKE3
//! extendable output for the hashed bytes.

use std::fmt;

use thiserror::Error;

/// Width of every checksum in bytes.
pub const CHECKSUM_LEN: usize = 16;

/// Raised when raw checksum bytes are not exactly [`CHECKSUM_LEN`] long.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("checksum must be {CHECKSUM_LEN} bytes, found {found}")]
pub struct ChecksumLengthError {
    /// Length of the rejected byte slice.
    pub found: usize,
}

/// A 128-bit content digest.
///
/// # Examples
///
/// ```
/// use fragcast::checksum::Checksum;
/// let digest = Checksum::compute(b"payload");
/// assert!(digest.verify(b"payload"));
/// assert!(!digest.verify(b"tampered"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self { Self(bytes) }

    /// Digest `bytes`.
    #[must_use]
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(bytes);
        let mut out = [0_u8; CHECKSUM_LEN];
        hasher.finalize_xof().fill(&mut out);
        Self(out)
    }

    /// Report whether `bytes` hash to this checksum.
    #[must_use]
    pub fn verify(&self, bytes: &[u8]) -> bool { Self::compute(bytes) == *self }

    /// Borrow the digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] { &self.0 }

    /// Copy the digest into an owned buffer for wire records.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> { self.0.to_vec() }

    /// Lower-case hexadecimal rendering used in keys and logs.
    #[must_use]
    pub fn to_hex(&self) -> String { hex::encode(self.0) }
}

impl TryFrom<&[u8]> for Checksum {
    type Error = ChecksumLengthError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        <[u8; CHECKSUM_LEN]>::try_from(value)
            .map(Self)
            .map_err(|_| ChecksumLengthError { found: value.len() })
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_hex()) }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn digest_is_stable_and_sixteen_bytes() {
        let first = Checksum::compute(b"hello fragment");
        let second = Checksum::compute(b"hello fragment");
        assert_eq!(first, second);
        assert_eq!(first.as_bytes().len(), CHECKSUM_LEN);
        assert_eq!(first.to_hex().len(), CHECKSUM_LEN * 2);
    }

    #[test]
    fn verify_rejects_tampered_bytes() {
        let digest = Checksum::compute(b"hello fragment");
        assert!(digest.verify(b"hello fragment"));
        assert!(!digest.verify(b"hello fragmenT"));
    }

    #[test]
    fn empty_payload_has_a_digest() {
        let digest = Checksum::compute(&[]);
        assert!(digest.verify(&[]));
        assert_ne!(digest, Checksum::compute(&[0]));
    }

    #[rstest]
    #[case(0)]
    #[case(15)]
    #[case(17)]
    #[case(32)]
    fn try_from_rejects_wrong_length(#[case] len: usize) {
        let raw = vec![7_u8; len];
        let err = Checksum::try_from(raw.as_slice()).expect_err("length must be rejected");
        assert_eq!(err.found, len);
    }

    #[test]
    fn try_from_round_trips_raw_bytes() {
        let digest = Checksum::compute(b"abc");
        let raw = digest.to_vec();
        assert_eq!(Checksum::try_from(raw.as_slice()), Ok(digest));
    }
}
