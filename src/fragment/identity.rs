use super::{FragmentIndex, Nonce};
use crate::checksum::Checksum;

/// Identity tuple shared by a reassembly operation and its fragments.
///
/// Operations are identified by `(nonce, checksum)`. Fragment-scoped
/// identities additionally carry the fragment's index so each persisted
/// fragment gets a key of its own.
///
/// # Examples
///
/// ```
/// use fragcast::{
///     checksum::Checksum,
///     fragment::{FragmentIndex, Nonce, OperationIdentity},
/// };
/// let checksum = Checksum::compute(b"payload");
/// let fragment = OperationIdentity::fragment(Nonce::new(1), checksum, FragmentIndex::new(3));
/// assert_eq!(fragment.index(), Some(FragmentIndex::new(3)));
/// assert_eq!(fragment.operation_scope(), OperationIdentity::operation(Nonce::new(1), checksum));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationIdentity {
    nonce: Nonce,
    checksum: Checksum,
    index: Option<FragmentIndex>,
}

impl OperationIdentity {
    /// Identity of a whole operation.
    #[must_use]
    pub const fn operation(nonce: Nonce, checksum: Checksum) -> Self {
        Self {
            nonce,
            checksum,
            index: None,
        }
    }

    /// Identity of one fragment slot within an operation.
    #[must_use]
    pub const fn fragment(nonce: Nonce, checksum: Checksum, index: FragmentIndex) -> Self {
        Self {
            nonce,
            checksum,
            index: Some(index),
        }
    }

    /// Return the operation nonce.
    #[must_use]
    pub const fn nonce(&self) -> Nonce { self.nonce }

    /// Return the whole-payload checksum.
    #[must_use]
    pub const fn checksum(&self) -> Checksum { self.checksum }

    /// Return the fragment index for fragment-scoped identities.
    #[must_use]
    pub const fn index(&self) -> Option<FragmentIndex> { self.index }

    /// Drop any fragment index, yielding the owning operation's identity.
    #[must_use]
    pub const fn operation_scope(&self) -> Self { Self::operation(self.nonce, self.checksum) }

    /// Narrow an operation identity to the fragment at `index`.
    #[must_use]
    pub const fn with_index(&self, index: FragmentIndex) -> Self {
        Self::fragment(self.nonce, self.checksum, index)
    }
}
