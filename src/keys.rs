//! Deterministic store keys for reassembly state.
//!
//! Any process holding an operation's identity can compute the same keys
//! without coordination. A key is the hex BLAKE3 digest of a stable string
//! encoding of `(namespace, nonce, checksum[, index])`, followed by a literal
//! purpose suffix:
//!
//! ```text
//! <64 hex chars>.header
//! <64 hex chars>.fragments.ingest-count
//! <64 hex chars>.fragments.persistence
//! <64 hex chars>.fragments.ingest-marker
//! ```

use std::fmt::Write as _;

use derive_more::Display;

use crate::fragment::{FragmentIndex, OperationIdentity};

/// A key in the shared store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct StoreKey(String);

impl StoreKey {
    /// Wrap an arbitrary key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self { Self(key.into()) }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl AsRef<str> for StoreKey {
    fn as_ref(&self) -> &str { &self.0 }
}

/// What a derived key stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Cached copy of the operation's reassembly header.
    Header,
    /// Atomic count of verified and persisted fragments.
    IngestCount,
    /// Serialized fragment record for one index.
    Persistence,
    /// Per-index counter used to recognise redelivered fragments.
    IngestMarker,
}

impl KeyPurpose {
    /// Literal suffix appended to the identity digest.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::IngestCount => "fragments.ingest-count",
            Self::Persistence => "fragments.persistence",
            Self::IngestMarker => "fragments.ingest-marker",
        }
    }

    /// Whether keys for this purpose are distinct per fragment index.
    #[must_use]
    pub const fn is_fragment_scoped(self) -> bool {
        matches!(self, Self::Persistence | Self::IngestMarker)
    }
}

/// Derives store keys inside a namespace.
///
/// The namespace stands in for the subject name in the key encoding.
/// [`FragcastConfig::key_deriver`](crate::FragcastConfig::key_deriver) passes
/// the configured `namespace`, independent of the transport subjects.
///
/// # Examples
///
/// ```
/// use fragcast::{
///     checksum::Checksum,
///     fragment::{Nonce, OperationIdentity},
///     keys::{KeyDeriver, KeyPurpose},
/// };
/// let deriver = KeyDeriver::new("fragcast");
/// let identity = OperationIdentity::operation(Nonce::new(1), Checksum::compute(b"abc"));
/// let key = deriver.derive(&identity, KeyPurpose::IngestCount);
/// assert!(key.as_str().ends_with(".fragments.ingest-count"));
/// assert_eq!(key, deriver.ingest_count_key(&identity));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyDeriver {
    namespace: String,
}

impl KeyDeriver {
    /// Create a deriver scoped to `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Return the namespace folded into every key.
    #[must_use]
    pub fn namespace(&self) -> &str { &self.namespace }

    /// Derive the key for `identity` and `purpose`.
    ///
    /// Operation-scoped purposes ignore any index carried by `identity`, so a
    /// fragment's identity maps to the same counter as its operation.
    #[must_use]
    pub fn derive(&self, identity: &OperationIdentity, purpose: KeyPurpose) -> StoreKey {
        let index = if purpose.is_fragment_scoped() {
            identity.index()
        } else {
            None
        };

        let mut encoded = format!(
            "{}/{}/{}",
            self.namespace,
            identity.nonce(),
            identity.checksum().to_hex()
        );
        if let Some(index) = index {
            let _ = write!(encoded, "/{index}");
        }

        let digest = blake3::hash(encoded.as_bytes());
        StoreKey(format!("{}.{}", digest.to_hex(), purpose.suffix()))
    }

    /// Key of the cached header.
    #[must_use]
    pub fn header_key(&self, identity: &OperationIdentity) -> StoreKey {
        self.derive(identity, KeyPurpose::Header)
    }

    /// Key of the operation's ingest counter.
    #[must_use]
    pub fn ingest_count_key(&self, identity: &OperationIdentity) -> StoreKey {
        self.derive(identity, KeyPurpose::IngestCount)
    }

    /// Key under which the fragment at `index` is persisted.
    #[must_use]
    pub fn persistence_key(&self, identity: &OperationIdentity, index: FragmentIndex) -> StoreKey {
        self.derive(&identity.with_index(index), KeyPurpose::Persistence)
    }

    /// Key of the redelivery marker for the fragment at `index`.
    #[must_use]
    pub fn ingest_marker_key(&self, identity: &OperationIdentity, index: FragmentIndex) -> StoreKey {
        self.derive(&identity.with_index(index), KeyPurpose::IngestMarker)
    }
}
