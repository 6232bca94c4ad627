//! Publish/subscribe bus carrying headers and fragments.
//!
//! The [`Transport`] trait is the seam to an external message bus with
//! at-least-once delivery (NATS JetStream, Google Pub/Sub and the like).
//! Subscribers in the same queue group share the subject's messages. Each
//! [`Delivery`] must be settled with [`Delivery::ack`] or [`Delivery::nack`];
//! a delivery that is neither settled within the subscription's ack wait nor
//! acknowledged is redelivered by the bus.

pub mod memory;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use thiserror::Error;

pub use self::memory::MemoryBus;

/// Errors surfaced by a [`Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The bus is shut down or unreachable.
    #[error("transport closed")]
    Closed,
    /// The bus refused to publish on `subject`.
    #[error("failed to publish on {subject}: {reason}")]
    Publish { subject: String, reason: String },
    /// The bus refused the subscription.
    #[error("failed to subscribe to {subject}: {reason}")]
    Subscribe { subject: String, reason: String },
}

/// Per-subscription delivery settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// How long a delivery may stay unsettled before the bus redelivers it.
    pub ack_wait: Duration,
    /// Maximum number of unsettled deliveries handed to this subscriber.
    pub max_in_flight: usize,
    /// Delivery attempts after which a message is dead-lettered.
    pub max_deliveries: u32,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(30),
            max_in_flight: 64,
            max_deliveries: 5,
        }
    }
}

/// Settles a single delivery with the bus.
pub trait Acknowledge: Send {
    /// Confirm the message was processed.
    fn ack(self: Box<Self>);

    /// Reject the message, asking the bus to redeliver after `redeliver_after`.
    fn nack(self: Box<Self>, redeliver_after: Duration);
}

/// A message handed to a subscriber.
pub struct Delivery {
    payload: Bytes,
    attempt: u32,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    /// Build a delivery from its parts.
    #[must_use]
    pub fn new(payload: Bytes, attempt: u32, acker: Box<dyn Acknowledge>) -> Self {
        Self {
            payload,
            attempt,
            acker,
        }
    }

    /// Borrow the message body.
    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// One-based delivery attempt; values above one indicate redelivery.
    #[must_use]
    pub fn attempt(&self) -> u32 { self.attempt }

    /// Report whether the bus has delivered this message before.
    #[must_use]
    pub fn is_redelivery(&self) -> bool { self.attempt > 1 }

    /// Acknowledge the delivery.
    pub fn ack(self) { self.acker.ack(); }

    /// Negatively acknowledge, requesting redelivery after `redeliver_after`.
    pub fn nack(self, redeliver_after: Duration) { self.acker.nack(redeliver_after); }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries for one subscriber.
pub struct Subscription {
    deliveries: BoxStream<'static, Delivery>,
}

impl Subscription {
    /// Wrap a delivery stream.
    #[must_use]
    pub fn new(deliveries: BoxStream<'static, Delivery>) -> Self { Self { deliveries } }

    /// Wait for the next delivery, or `None` once the bus closes.
    pub async fn next(&mut self) -> Option<Delivery> { self.deliveries.next().await }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// At-least-once publish/subscribe bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish `payload` on `subject`.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Join `queue_group` on `subject`. Messages on the subject are spread
    /// across the group's subscribers.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, TransportError>;
}
