//! Error types emitted by the fragmentation layer.
//!
//! Malformed records are reported through [`ValidationError`] so callers can
//! tell them apart from integrity failures, which the ingest and reassembly
//! layers surface separately.

use std::fmt;

use thiserror::Error;

use super::FragmentIndex;
use crate::checksum::ChecksumLengthError;

/// Names the checksum field that failed a length check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumField {
    /// The whole-payload checksum on a reassembly header.
    Header,
    /// A fragment's own payload checksum.
    Fragment,
    /// The whole-payload checksum copied onto a fragment.
    Reassembled,
}

impl fmt::Display for ChecksumField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::Fragment => "fragment",
            Self::Reassembled => "reassembled",
        })
    }
}

/// Structural problems with a header or fragment record.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A checksum field is not exactly 128 bits wide.
    #[error("{field} checksum is malformed: {source}")]
    ChecksumLength {
        field: ChecksumField,
        #[source]
        source: ChecksumLengthError,
    },
    /// The record claims zero fragments.
    #[error("cardinality must be greater than zero")]
    ZeroCardinality,
    /// The fragment index does not address a slot of the operation.
    #[error("fragment index {index} out of range for cardinality {cardinality}")]
    IndexOutOfRange {
        index: FragmentIndex,
        cardinality: u32,
    },
    /// The declared payload size disagrees with the carried bytes.
    #[error("fragment declares {declared} payload bytes but carries {actual}")]
    PayloadSizeMismatch { declared: u64, actual: usize },
}

/// Errors produced while fragmenting outbound payloads.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FragmentationError {
    /// The payload needs more fragments than a `u32` cardinality can express.
    #[error("payload requires {fragments} fragments, exceeding u32::MAX")]
    TooManyFragments { fragments: usize },
}
