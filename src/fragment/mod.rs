//! Fragment and reassembly-header primitives.
//!
//! This module collects the domain types shared by the broadcast, ingest and
//! reassembly layers. Each sub-module focuses on a single concept to keep the
//! code small and easy to audit while still providing a cohesive API at the
//! crate root.

pub mod error;
pub mod fragmenter;
pub mod header;
pub mod identity;
pub mod index;
pub mod nonce;
pub mod record;

pub use error::{ChecksumField, FragmentationError, ValidationError};
pub use fragmenter::{DEFAULT_CHUNK_SIZE, FragmentBatch, Fragmenter, MAX_CHUNK_SIZE};
pub use header::{ReassemblyHeader, ReassemblyOperation};
pub use identity::OperationIdentity;
pub use index::FragmentIndex;
pub use nonce::{Nonce, NonceSource};
pub use record::{Fragment, FragmentChecksums};

#[cfg(test)]
mod tests;
