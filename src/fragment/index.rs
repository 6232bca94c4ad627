//! Zero-based fragment positioning within a reassembly operation.

use std::num::TryFromIntError;

use bincode::{Decode, Encode};
use derive_more::{Display, From};

/// Zero-based ordinal describing a fragment's slot in its operation.
///
/// # Examples
///
/// ```
/// use fragcast::fragment::FragmentIndex;
/// let index = FragmentIndex::new(2);
/// assert!(index.is_within(3));
/// assert!(!index.is_within(2));
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Display, From,
)]
#[display("{_0}")]
pub struct FragmentIndex(u32);

impl FragmentIndex {
    /// Construct an index from a `u32` value.
    #[must_use]
    pub const fn new(value: u32) -> Self { Self(value) }

    /// Return the first fragment slot.
    #[must_use]
    pub const fn zero() -> Self { Self(0) }

    /// Return the underlying numeric value.
    #[must_use]
    pub const fn get(self) -> u32 { self.0 }

    /// Report whether the index addresses a slot of an operation with
    /// `cardinality` fragments.
    #[must_use]
    pub const fn is_within(self, cardinality: u32) -> bool { self.0 < cardinality }

    /// Iterate every slot of an operation with `cardinality` fragments in
    /// ascending order.
    pub fn all(cardinality: u32) -> impl Iterator<Item = Self> { (0..cardinality).map(Self) }
}

impl TryFrom<usize> for FragmentIndex {
    type Error = TryFromIntError;

    fn try_from(value: usize) -> Result<Self, Self::Error> { u32::try_from(value).map(Self) }
}

impl From<FragmentIndex> for u32 {
    fn from(value: FragmentIndex) -> Self { value.0 }
}
