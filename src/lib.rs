#![doc(html_root_url = "https://docs.rs/fragcast/latest")]
//! Public API for the `fragcast` library.
//!
//! `fragcast` splits byte payloads into checksummed fragments, broadcasts
//! them over an at-least-once publish/subscribe bus and reassembles them in
//! whichever process observes completion. Coordination happens only through
//! a shared key-value store: fragments are persisted under deterministic
//! keys and counted with the store's atomic increment.

pub mod backoff;
pub mod broadcast;
pub mod checksum;
pub mod config;
pub mod fragment;
pub mod ingest;
pub mod keys;
pub mod metrics;
pub mod panic;
pub mod reassemble;
pub mod store;
pub mod transport;
pub mod wire;
pub mod worker;

mod test_helpers;

pub use backoff::BackoffConfig;
pub use broadcast::{BroadcastError, Broadcaster};
pub use checksum::{CHECKSUM_LEN, Checksum, ChecksumLengthError};
pub use config::{ConfigError, FragcastConfig, Subjects};
pub use fragment::{
    DEFAULT_CHUNK_SIZE,
    Fragment,
    FragmentBatch,
    FragmentIndex,
    FragmentationError,
    Fragmenter,
    MAX_CHUNK_SIZE,
    Nonce,
    NonceSource,
    OperationIdentity,
    ReassemblyHeader,
    ReassemblyOperation,
    ValidationError,
};
pub use ingest::{IngestError, Ingested, Ingestor};
pub use keys::{KeyDeriver, KeyPurpose, StoreKey};
pub use reassemble::{Reassembler, ReassemblyError};
pub use store::{MemoryStore, Store, StoreError};
pub use transport::{Delivery, MemoryBus, SubscribeOptions, Subscription, Transport, TransportError};
pub use wire::WireRecord;
pub use worker::{ReassembledPacket, WorkerPool};
