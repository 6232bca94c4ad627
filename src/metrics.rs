//! Metric helpers for `fragcast`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking fragments counted towards an operation.
pub const FRAGMENTS_INGESTED: &str = "fragcast_fragments_ingested_total";
/// Name of the counter tracking fragments refused during ingestion.
pub const FRAGMENTS_REJECTED: &str = "fragcast_fragments_rejected_total";
/// Name of the counter tracking redelivered fragments that were not recounted.
pub const FRAGMENTS_DUPLICATE: &str = "fragcast_fragments_duplicate_total";
/// Name of the counter tracking reassembly attempts by outcome.
pub const REASSEMBLIES: &str = "fragcast_reassemblies_total";
/// Name of the counter tracking fragments published to the bus.
pub const FRAGMENTS_PUBLISHED: &str = "fragcast_fragments_published_total";
/// Name of the counter tracking panics caught in worker tasks.
pub const WORKER_PANICS: &str = "fragcast_worker_panics_total";

/// Record a fragment that advanced its operation's counter.
pub fn inc_ingested_fragments() {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_INGESTED).increment(1);
}

/// Record a fragment refused for `reason`.
pub fn inc_rejected_fragments(reason: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_REJECTED, "reason" => reason).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Record a redelivered fragment that was persisted but not recounted.
pub fn inc_duplicate_fragments() {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_DUPLICATE).increment(1);
}

/// Record a reassembly attempt ending in `outcome`.
pub fn inc_reassemblies(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(REASSEMBLIES, "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record `count` fragments published to the bus.
pub fn add_published_fragments(count: u64) {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_PUBLISHED).increment(count);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record a panic caught in a worker task.
pub fn inc_worker_panics() {
    #[cfg(feature = "metrics")]
    counter!(WORKER_PANICS).increment(1);
}
