//! Shared utilities for integration tests.
//!
//! Provides fixtures for an in-process pipeline: a [`MemoryBus`], a
//! [`MemoryStore`] and worker pools wired to them.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use fragcast::{
    FragcastConfig,
    Fragmenter,
    Ingestor,
    KeyDeriver,
    MemoryBus,
    MemoryStore,
    ReassembledPacket,
    Reassembler,
    WorkerPool,
    config::{IngestConfig, ReassemblyConfig},
};
use rstest::fixture;
use tokio::{sync::mpsc, time::timeout};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub const NAMESPACE: &str = "integration";

#[fixture]
pub fn keys() -> KeyDeriver { KeyDeriver::new(NAMESPACE) }

#[fixture]
pub fn store() -> Arc<MemoryStore> { Arc::new(MemoryStore::new()) }

/// Build a fragmenter with the given chunk size.
pub fn fragmenter(chunk_size: usize) -> Fragmenter {
    Fragmenter::new(NonZeroUsize::new(chunk_size).expect("chunk size must be non-zero"))
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from((i * 7 + 3) % 256).unwrap_or_default())
        .collect()
}

/// Configuration tuned for fast tests.
pub fn test_config() -> FragcastConfig {
    FragcastConfig {
        namespace: NAMESPACE.to_owned(),
        ingest: IngestConfig {
            workers: 3,
            ack_wait_ms: 2_000,
            redeliver_after_ms: 10,
            ..IngestConfig::default()
        },
        reassembly: ReassemblyConfig {
            ack_wait_ms: 2_000,
            poll_initial_ms: 5,
            poll_max_ms: 40,
            ..ReassemblyConfig::default()
        },
        ..FragcastConfig::default()
    }
}

/// Running workers over an in-process bus and store.
pub struct Pipeline {
    pub bus: Arc<MemoryBus>,
    pub store: Arc<MemoryStore>,
    pub config: FragcastConfig,
    pub packets: mpsc::Receiver<ReassembledPacket>,
    pool: WorkerPool,
}

impl Pipeline {
    /// Subscribe ingest and reassembly workers according to `config`.
    pub async fn start(config: FragcastConfig) -> TestResult<Self> {
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());
        let pool = WorkerPool::new();

        let ingestor = Ingestor::new(Arc::clone(&store), config.key_deriver())
            .dedupe_redeliveries(config.ingest.dedupe_redeliveries);
        pool.spawn_ingest_workers(
            bus.as_ref(),
            &config.subjects.fragment_ingest,
            Arc::new(ingestor),
            &config.ingest,
        )
        .await?;

        let (tx, packets) = mpsc::channel(16);
        let reassembler = Reassembler::new(Arc::clone(&store), config.key_deriver());
        pool.spawn_reassembly_worker(
            bus.as_ref(),
            &config.subjects.reassembly,
            Arc::new(reassembler),
            &config.reassembly,
            tx,
        )
        .await?;

        Ok(Self {
            bus,
            store,
            config,
            packets,
            pool,
        })
    }

    /// Wait for the next reassembled packet.
    pub async fn next_packet(&mut self, wait: Duration) -> TestResult<ReassembledPacket> {
        timeout(wait, self.packets.recv())
            .await?
            .ok_or_else(|| "reassembly channel closed".into())
    }

    /// Stop the workers and close the bus.
    pub async fn stop(self) {
        self.pool.shutdown().await;
        self.bus.close();
    }
}
