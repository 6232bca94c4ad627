//! In-process at-least-once bus.
//!
//! [`MemoryBus`] mirrors the delivery contract of a durable queue-group bus:
//!
//! - every queue group subscribed to a subject receives each message once,
//!   shared among the group's subscribers;
//! - a subscriber holds at most `max_in_flight` unsettled deliveries;
//! - an unsettled delivery is redelivered once its ack wait elapses, and a
//!   nack schedules redelivery after the requested delay;
//! - a message that has been delivered `max_deliveries` times is dropped and
//!   counted as dead-lettered;
//! - messages published before any group subscribes are retained and handed
//!   to the first group that joins the subject.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc},
    task::AbortHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Acknowledge, Delivery, SubscribeOptions, Subscription, Transport, TransportError};

#[derive(Clone, Debug)]
struct Envelope {
    payload: Bytes,
    attempt: u32,
}

#[derive(Debug)]
struct QueueGroup {
    subject: String,
    name: String,
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    dead_letters: AtomicU64,
}

impl QueueGroup {
    fn new(subject: &str, name: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            subject: subject.to_owned(),
            name: name.to_owned(),
            sender,
            receiver: Mutex::new(receiver),
            dead_letters: AtomicU64::new(0),
        }
    }

    fn enqueue(&self, envelope: Envelope) {
        if self.sender.send(envelope).is_err() {
            warn!(subject = %self.subject, group = %self.name, "queue group receiver dropped");
        }
    }

    fn redeliver(&self, envelope: Envelope, max_deliveries: u32) {
        if envelope.attempt >= max_deliveries {
            self.dead_letters.fetch_add(1, Ordering::Relaxed);
            warn!(
                subject = %self.subject,
                group = %self.name,
                attempt = envelope.attempt,
                "delivery attempts exhausted; dropping message"
            );
            return;
        }
        self.enqueue(Envelope {
            attempt: envelope.attempt + 1,
            ..envelope
        });
    }

    fn deliver(
        self: &Arc<Self>,
        envelope: Envelope,
        permit: OwnedSemaphorePermit,
        options: SubscribeOptions,
    ) -> Delivery {
        let settled = Arc::new(AtomicBool::new(false));
        let timer = tokio::spawn({
            let group = Arc::clone(self);
            let settled = Arc::clone(&settled);
            let envelope = envelope.clone();
            async move {
                sleep(options.ack_wait).await;
                if !settled.swap(true, Ordering::AcqRel) {
                    debug!(
                        subject = %group.subject,
                        group = %group.name,
                        attempt = envelope.attempt,
                        "ack wait elapsed; redelivering"
                    );
                    group.redeliver(envelope, options.max_deliveries);
                }
            }
        })
        .abort_handle();

        let payload = envelope.payload.clone();
        let attempt = envelope.attempt;
        Delivery::new(
            payload,
            attempt,
            Box::new(MemoryAcker {
                group: Arc::clone(self),
                envelope,
                settled,
                timer,
                max_deliveries: options.max_deliveries,
                _permit: permit,
            }),
        )
    }
}

struct MemoryAcker {
    group: Arc<QueueGroup>,
    envelope: Envelope,
    settled: Arc<AtomicBool>,
    timer: AbortHandle,
    max_deliveries: u32,
    _permit: OwnedSemaphorePermit,
}

impl MemoryAcker {
    fn settle(&self) -> bool {
        let first = !self.settled.swap(true, Ordering::AcqRel);
        if first {
            self.timer.abort();
        }
        first
    }
}

impl Acknowledge for MemoryAcker {
    fn ack(self: Box<Self>) { self.settle(); }

    fn nack(self: Box<Self>, redeliver_after: Duration) {
        if !self.settle() {
            return;
        }
        let Self {
            group,
            envelope,
            max_deliveries,
            ..
        } = *self;
        if redeliver_after.is_zero() {
            group.redeliver(envelope, max_deliveries);
            return;
        }
        tokio::spawn(async move {
            sleep(redeliver_after).await;
            group.redeliver(envelope, max_deliveries);
        });
    }
}

#[derive(Debug, Default)]
struct SubjectState {
    groups: HashMap<String, Arc<QueueGroup>>,
    backlog: Vec<Bytes>,
}

#[derive(Debug, Default)]
struct BusInner {
    subjects: DashMap<String, SubjectState>,
    shutdown: CancellationToken,
}

/// In-process implementation of [`Transport`].
///
/// Cloning the bus yields another handle to the same subjects.
#[derive(Clone, Debug, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Close the bus. Publishing fails afterwards and every subscription
    /// stream ends.
    pub fn close(&self) { self.inner.shutdown.cancel(); }

    /// Number of messages dropped after exhausting their delivery attempts.
    #[must_use]
    pub fn dead_letters(&self, subject: &str, queue_group: &str) -> u64 {
        self.inner
            .subjects
            .get(subject)
            .and_then(|state| {
                state
                    .groups
                    .get(queue_group)
                    .map(|group| group.dead_letters.load(Ordering::Relaxed))
            })
            .unwrap_or(0)
    }

    /// Number of messages on `subject` waiting for a first subscriber.
    #[must_use]
    pub fn backlog(&self, subject: &str) -> usize {
        self.inner
            .subjects
            .get(subject)
            .map_or(0, |state| state.backlog.len())
    }
}

#[async_trait]
impl Transport for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut state = self.inner.subjects.entry(subject.to_owned()).or_default();
        if state.groups.is_empty() {
            state.backlog.push(payload);
            return Ok(());
        }
        for group in state.groups.values() {
            group.enqueue(Envelope {
                payload: payload.clone(),
                attempt: 1,
            });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, TransportError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if options.max_in_flight == 0 {
            return Err(TransportError::Subscribe {
                subject: subject.to_owned(),
                reason: "max_in_flight must be at least one".to_owned(),
            });
        }

        let group = {
            let mut state = self.inner.subjects.entry(subject.to_owned()).or_default();
            let group = Arc::clone(
                state
                    .groups
                    .entry(queue_group.to_owned())
                    .or_insert_with(|| Arc::new(QueueGroup::new(subject, queue_group))),
            );
            for payload in state.backlog.drain(..) {
                group.enqueue(Envelope {
                    payload,
                    attempt: 1,
                });
            }
            group
        };

        let permits = Arc::new(Semaphore::new(options.max_in_flight));
        let shutdown = self.inner.shutdown.clone();
        let deliveries = futures::stream::unfold(
            (group, permits, shutdown),
            move |(group, permits, shutdown)| async move {
                let next = async {
                    let permit = Arc::clone(&permits).acquire_owned().await.ok()?;
                    let envelope = group.receiver.lock().await.recv().await?;
                    Some((envelope, permit))
                };
                let (envelope, permit) = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => None,
                    next = next => next,
                }?;
                let delivery = group.deliver(envelope, permit, options);
                Some((delivery, (group, permits, shutdown)))
            },
        );
        Ok(Subscription::new(deliveries.boxed()))
    }
}
