//! Subscriber worker pools for ingestion and reassembly.
//!
//! Ingest workers join a queue group on the fragment-ingest subject and hand
//! each delivery to an [`Ingestor`]. The reassembly worker listens for
//! headers, caches them and polls the [`Reassembler`] by nacking the header
//! with exponential back-off until the operation is complete. Reassembled
//! payloads are sent on an `mpsc` channel.
//!
//! Each worker processes one delivery at a time. A panic while handling a
//! delivery is caught and logged, and the delivery is nacked so the bus can
//! try again.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    backoff::BackoffConfig,
    checksum::Checksum,
    config::{IngestConfig, ReassemblyConfig},
    fragment::{Fragment, Nonce, ReassemblyHeader, ReassemblyOperation},
    ingest::Ingestor,
    metrics,
    panic::PanicMessage,
    reassemble::Reassembler,
    store::Store,
    transport::{Delivery, Subscription, Transport, TransportError},
    wire::WireRecord,
};

/// A verified payload produced by the reassembly worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassembledPacket {
    header: ReassemblyHeader,
    payload: Vec<u8>,
}

impl ReassembledPacket {
    /// Operation nonce.
    #[must_use]
    pub fn nonce(&self) -> Nonce { self.header.nonce }

    /// Borrow the header the payload was reassembled from.
    #[must_use]
    pub fn header(&self) -> &ReassemblyHeader { &self.header }

    /// Checksum of the payload.
    #[must_use]
    pub fn checksum(&self) -> Checksum { Checksum::compute(&self.payload) }

    /// Borrow the payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the packet, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> { self.payload }
}

/// How a handled delivery is settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Disposition {
    Ack,
    Nack(Duration),
}

impl Disposition {
    fn settle(self, delivery: Delivery) {
        match self {
            Self::Ack => delivery.ack(),
            Self::Nack(delay) => delivery.nack(delay),
        }
    }
}

/// Owns the worker tasks and their shutdown signal.
#[derive(Debug, Default)]
pub struct WorkerPool {
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Token cancelled when the pool shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Subscribe `config.workers` ingest workers to `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if a subscription is refused. Workers
    /// spawned before the failure keep running until shutdown.
    pub async fn spawn_ingest_workers<S, T>(
        &self,
        transport: &T,
        subject: &str,
        ingestor: Arc<Ingestor<S>>,
        config: &IngestConfig,
    ) -> Result<(), TransportError>
    where
        S: Store + 'static,
        T: Transport + ?Sized,
    {
        let redeliver_after = config.redeliver_after();
        for id in 0..config.workers.max(1) {
            let subscription = transport
                .subscribe(subject, &config.queue_group, config.subscribe_options())
                .await?;
            let ingestor = Arc::clone(&ingestor);
            self.tracker.spawn(run_worker(
                "ingest",
                id,
                subscription,
                self.shutdown.clone(),
                redeliver_after,
                move |payload, attempt| {
                    let ingestor = Arc::clone(&ingestor);
                    async move {
                        handle_fragment(&ingestor, &payload, attempt, redeliver_after).await
                    }
                },
            ));
        }
        debug!(subject, workers = config.workers, "ingest workers started");
        Ok(())
    }

    /// Subscribe a reassembly worker to `subject`, sending completed
    /// payloads on `output`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the subscription is refused.
    pub async fn spawn_reassembly_worker<S, T>(
        &self,
        transport: &T,
        subject: &str,
        reassembler: Arc<Reassembler<S>>,
        config: &ReassemblyConfig,
        output: mpsc::Sender<ReassembledPacket>,
    ) -> Result<(), TransportError>
    where
        S: Store + 'static,
        T: Transport + ?Sized,
    {
        let subscription = transport
            .subscribe(subject, &config.queue_group, config.subscribe_options())
            .await?;
        let policy = PollPolicy {
            backoff: config.backoff(),
            max_deliveries: config.max_deliveries,
        };
        self.tracker.spawn(run_worker(
            "reassembly",
            0,
            subscription,
            self.shutdown.clone(),
            policy.backoff.initial_delay,
            move |payload, attempt| {
                let reassembler = Arc::clone(&reassembler);
                let output = output.clone();
                async move {
                    handle_header(&reassembler, &payload, attempt, policy, &output).await
                }
            },
        ));
        debug!(subject, "reassembly worker started");
        Ok(())
    }

    /// Signal every worker to stop and wait for them to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Receive deliveries until shutdown, settling each one per `handle`.
async fn run_worker<H, Fut>(
    kind: &'static str,
    id: usize,
    mut subscription: Subscription,
    shutdown: CancellationToken,
    panic_delay: Duration,
    handle: H,
) where
    H: Fn(Bytes, u32) -> Fut + Send,
    Fut: Future<Output = Disposition> + Send,
{
    loop {
        let delivery = tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            next = subscription.next() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };

        let handling = handle(delivery.payload().clone(), delivery.attempt());
        let disposition = match AssertUnwindSafe(handling).catch_unwind().await {
            Ok(disposition) => disposition,
            Err(panic) => {
                metrics::inc_worker_panics();
                let panic_msg = PanicMessage::new(panic);
                error!(
                    panic = %panic_msg,
                    worker = kind,
                    id,
                    attempt = delivery.attempt(),
                    "worker panicked while handling delivery"
                );
                Disposition::Nack(panic_delay)
            }
        };

        disposition.settle(delivery);
    }
    debug!(worker = kind, id, "worker stopped");
}

async fn handle_fragment<S: Store>(
    ingestor: &Ingestor<S>,
    payload: &[u8],
    attempt: u32,
    redeliver_after: Duration,
) -> Disposition {
    let fragment = match Fragment::from_wire(payload) {
        Ok(fragment) => fragment,
        Err(err) => {
            metrics::inc_rejected_fragments("decode");
            warn!(error = %err, attempt, "undecodable fragment; dropping");
            return Disposition::Ack;
        }
    };

    match ingestor.ingest(&fragment).await {
        Ok(_) => Disposition::Ack,
        Err(err) if err.is_retryable() => {
            warn!(
                nonce = %fragment.nonce,
                index = %fragment.index,
                attempt,
                error = %err,
                "fragment ingestion failed; requesting redelivery"
            );
            Disposition::Nack(redeliver_after)
        }
        Err(err) => {
            warn!(
                nonce = %fragment.nonce,
                index = %fragment.index,
                error = %err,
                "rejecting fragment"
            );
            Disposition::Ack
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PollPolicy {
    backoff: BackoffConfig,
    max_deliveries: u32,
}

async fn handle_header<S: Store>(
    reassembler: &Reassembler<S>,
    payload: &[u8],
    attempt: u32,
    policy: PollPolicy,
    output: &mpsc::Sender<ReassembledPacket>,
) -> Disposition {
    let header = match ReassemblyHeader::from_wire(payload) {
        Ok(header) => header,
        Err(err) => {
            warn!(error = %err, attempt, "undecodable reassembly header; dropping");
            return Disposition::Ack;
        }
    };

    if attempt == 1
        && let Err(err) = reassembler.cache_header(&header).await
    {
        warn!(nonce = %header.nonce, error = %err, "failed to cache reassembly header");
    }

    let mut operation = ReassemblyOperation::new(header);
    match reassembler.reassemble(&mut operation).await {
        Ok(()) => {
            let header = operation.header().clone();
            let Some(payload) = operation.into_payload() else {
                error!(nonce = %header.nonce, "reassembly reported success without a payload");
                return Disposition::Ack;
            };
            info!(nonce = %header.nonce, size = header.size, attempt, "packet reassembled");
            if output.send(ReassembledPacket { header, payload }).await.is_err() {
                warn!("reassembled packet receiver dropped");
            }
            Disposition::Ack
        }
        Err(err) if err.is_retryable() => {
            if attempt >= policy.max_deliveries {
                error!(
                    nonce = %operation.nonce(),
                    attempt,
                    error = %err,
                    "abandoning reassembly after final delivery"
                );
                return Disposition::Ack;
            }
            let delay = policy.backoff.delay_for_attempt(attempt);
            debug!(
                nonce = %operation.nonce(),
                attempt,
                delay_ms = delay.as_millis(),
                error = %err,
                "operation not ready; polling again"
            );
            Disposition::Nack(delay)
        }
        Err(err) => {
            error!(nonce = %operation.nonce(), attempt, error = %err, "reassembly failed");
            Disposition::Ack
        }
    }
}
