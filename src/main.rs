//! `fragcast` binary: relays a file through the fragmentation pipeline.
//!
//! The relay runs every stage in one process over [`MemoryBus`] and
//! [`MemoryStore`]: the file is fragmented and broadcast, ingested by the
//! configured worker pool, reassembled and verified, then written out.

mod cli;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use fragcast::{
    broadcast::{BroadcastError, Broadcaster},
    config::{ConfigError, FragcastConfig},
    ingest::Ingestor,
    reassemble::Reassembler,
    store::MemoryStore,
    transport::{MemoryBus, TransportError},
    worker::WorkerPool,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
    #[cfg(feature = "metrics")]
    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("payload was not reassembled within {0:?}")]
    TimedOut(Duration),
    #[error("reassembly pipeline stopped before delivering the payload")]
    Stopped,
    #[error("interrupted")]
    Interrupted,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RelayError + '_ {
    move |source| RelayError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(feature = "metrics")]
fn install_metrics_exporter(config: &FragcastConfig) -> Result<(), RelayError> {
    if let Some(addr) = config.metrics_listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "prometheus exporter listening");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics_exporter(config: &FragcastConfig) -> Result<(), RelayError> {
    if config.metrics_listen.is_some() {
        tracing::warn!("metrics_listen is set but the metrics feature is disabled");
    }
    Ok(())
}

async fn relay(
    config: &FragcastConfig,
    input: &Path,
    output: &Path,
    wait: Duration,
) -> Result<(), RelayError> {
    let payload = tokio::fs::read(input).await.map_err(io_error(input))?;
    let fragmenter = config.fragmenter()?;

    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryStore::new());
    let keys = config.key_deriver();
    let ttl = config.store.ttl();

    let pool = WorkerPool::new();
    let ingestor = Ingestor::new(Arc::clone(&store), keys.clone())
        .with_ttl(ttl)
        .dedupe_redeliveries(config.ingest.dedupe_redeliveries);
    pool.spawn_ingest_workers(
        bus.as_ref(),
        &config.subjects.fragment_ingest,
        Arc::new(ingestor),
        &config.ingest,
    )
    .await?;

    let (tx, mut rx) = mpsc::channel(1);
    let reassembler = Reassembler::new(Arc::clone(&store), keys).with_ttl(ttl);
    pool.spawn_reassembly_worker(
        bus.as_ref(),
        &config.subjects.reassembly,
        Arc::new(reassembler),
        &config.reassembly,
        tx,
    )
    .await?;

    let broadcaster = Broadcaster::new(Arc::clone(&bus), config.subjects.clone())
        .with_publish_rate(config.broadcast.publish_rate);
    let operation = broadcaster.send(&fragmenter, &payload).await?;
    info!(
        nonce = %operation.nonce(),
        cardinality = operation.cardinality(),
        size = operation.size(),
        "payload broadcast"
    );

    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    let received = loop {
        let packet = tokio::select! {
            packet = rx.recv() => packet.ok_or(RelayError::Stopped)?,
            () = &mut deadline => return Err(RelayError::TimedOut(wait)),
            _ = tokio::signal::ctrl_c() => return Err(RelayError::Interrupted),
        };
        if packet.nonce() == operation.nonce() {
            break packet;
        }
    };

    tokio::fs::write(output, received.payload())
        .await
        .map_err(io_error(output))?;
    info!(
        path = %output.display(),
        checksum = %received.checksum(),
        "reassembled payload written"
    );

    pool.shutdown().await;
    bus.close();
    Ok(())
}

async fn run(cli: cli::Cli) -> Result<(), RelayError> {
    let config = FragcastConfig::load(cli.config.as_deref())?;
    install_metrics_exporter(&config)?;
    match cli.command {
        cli::Command::Relay {
            input,
            output,
            timeout_secs,
        } => relay(&config, &input, &output, Duration::from_secs(timeout_secs)).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(cli::Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fragcast failed");
            ExitCode::FAILURE
        }
    }
}
