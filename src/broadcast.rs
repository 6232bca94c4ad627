//! Publishing fragmented operations to the bus.
//!
//! A broadcast publishes the reassembly header on the reassembly subject and
//! then every fragment, in index order, on the fragment-ingest subject. The
//! first publish failure aborts the broadcast. Fragments already published
//! stay on the bus; they are not retracted.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use bincode::error::EncodeError;
use bytes::Bytes;
use leaky_bucket::RateLimiter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::Subjects,
    fragment::{FragmentBatch, FragmentIndex, FragmentationError, Fragmenter, ReassemblyOperation},
    metrics,
    transport::{Transport, TransportError},
    wire::WireRecord,
};

/// Failures reported by [`Broadcaster::broadcast`].
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The payload could not be split into fragments.
    #[error(transparent)]
    Fragmentation(#[from] FragmentationError),
    /// A header or fragment could not be serialized.
    #[error("failed to encode record: {0}")]
    Encode(#[from] EncodeError),
    /// The header could not be published; no fragment was sent.
    #[error("failed to publish reassembly header: {0}")]
    Header(#[source] TransportError),
    /// Fragment `index` could not be published.
    #[error("failed to publish fragment {index} after {published} fragments: {source}")]
    Fragment {
        index: FragmentIndex,
        published: usize,
        #[source]
        source: TransportError,
    },
}

impl BroadcastError {
    /// Number of fragments that reached the bus before the failure.
    #[must_use]
    pub fn published(&self) -> usize {
        match self {
            Self::Fragment { published, .. } => *published,
            _ => 0,
        }
    }
}

/// Publishes headers and fragments over a [`Transport`].
pub struct Broadcaster<T> {
    transport: Arc<T>,
    subjects: Subjects,
    limiter: Option<RateLimiter>,
}

impl<T: Transport> Broadcaster<T> {
    /// Create a broadcaster publishing on `subjects`.
    #[must_use]
    pub fn new(transport: Arc<T>, subjects: Subjects) -> Self {
        Self {
            transport,
            subjects,
            limiter: None,
        }
    }

    /// Cap fragment publication at `rate` per second. `None` removes the cap.
    #[must_use]
    pub fn with_publish_rate(mut self, rate: Option<NonZeroUsize>) -> Self {
        self.limiter = rate.map(|rate| {
            let r = rate.get();
            RateLimiter::builder()
                .initial(r)
                .refill(r)
                .interval(Duration::from_secs(1))
                .max(r)
                .build()
        });
        self
    }

    /// Borrow the subjects used for publishing.
    #[must_use]
    pub fn subjects(&self) -> &Subjects { &self.subjects }

    /// Publish `batch`: header first, then each fragment in index order.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Encode`] if a record cannot be serialized,
    /// [`BroadcastError::Header`] if the header cannot be published and
    /// [`BroadcastError::Fragment`] for the first fragment that fails.
    pub async fn broadcast(&self, batch: &FragmentBatch) -> Result<(), BroadcastError> {
        let header = batch.header();
        self.transport
            .publish(&self.subjects.reassembly, Bytes::from(header.to_wire()?))
            .await
            .map_err(BroadcastError::Header)?;

        let mut published = 0;
        for fragment in batch.fragments() {
            let record = Bytes::from(fragment.to_wire()?);
            if let Some(limiter) = &self.limiter {
                limiter.acquire(1).await;
            }
            if let Err(source) = self
                .transport
                .publish(&self.subjects.fragment_ingest, record)
                .await
            {
                warn!(
                    nonce = %header.nonce,
                    index = %fragment.index,
                    published,
                    cardinality = header.cardinality,
                    error = %source,
                    "broadcast aborted"
                );
                metrics::add_published_fragments(published as u64);
                return Err(BroadcastError::Fragment {
                    index: fragment.index,
                    published,
                    source,
                });
            }
            published += 1;
        }

        metrics::add_published_fragments(published as u64);
        debug!(
            nonce = %header.nonce,
            cardinality = header.cardinality,
            size = header.size,
            "operation broadcast"
        );
        Ok(())
    }

    /// Fragment `payload` with `fragmenter` and broadcast the result.
    ///
    /// Returns the local operation, payload included.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Fragmentation`] if the payload cannot be
    /// fragmented, otherwise any error from [`Self::broadcast`].
    pub async fn send(
        &self,
        fragmenter: &Fragmenter,
        payload: impl AsRef<[u8]>,
    ) -> Result<ReassemblyOperation, BroadcastError> {
        let batch = fragmenter.fragment(payload)?;
        self.broadcast(&batch).await?;
        let (operation, _) = batch.into_parts();
        Ok(operation)
    }
}

impl<T> std::fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subjects", &self.subjects)
            .field("rate_limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rstest::rstest;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        fragment::{Fragment, ReassemblyHeader},
        transport::{SubscribeOptions, Subscription},
    };

    /// Records publications and fails after `limit` successful publishes.
    #[derive(Default)]
    struct RecordingTransport {
        published: Mutex<Vec<(String, Bytes)>>,
        limit: Option<usize>,
        calls: AtomicUsize,
    }

    impl RecordingTransport {
        fn failing_after(limit: usize) -> Self {
            Self {
                limit: Some(limit),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.limit.is_some_and(|limit| call >= limit) {
                return Err(TransportError::Publish {
                    subject: subject.to_owned(),
                    reason: "injected".to_owned(),
                });
            }
            self.published
                .lock()
                .await
                .push((subject.to_owned(), payload));
            Ok(())
        }

        async fn subscribe(
            &self,
            subject: &str,
            _queue_group: &str,
            _options: SubscribeOptions,
        ) -> Result<Subscription, TransportError> {
            Err(TransportError::Subscribe {
                subject: subject.to_owned(),
                reason: "not supported".to_owned(),
            })
        }
    }

    fn fragmenter(chunk: usize) -> Fragmenter {
        Fragmenter::new(NonZeroUsize::new(chunk).expect("non-zero"))
    }

    #[tokio::test]
    async fn header_precedes_fragments_in_index_order() {
        let transport = Arc::new(RecordingTransport::default());
        let broadcaster = Broadcaster::new(Arc::clone(&transport), Subjects::default());

        let operation = broadcaster
            .send(&fragmenter(4), b"0123456789")
            .await
            .expect("broadcast");
        assert_eq!(operation.payload(), Some(&b"0123456789"[..]));

        let published = transport.published.lock().await;
        assert_eq!(published.len(), 4);
        let (subject, bytes) = &published[0];
        assert_eq!(subject, "fragcast.reassembly");
        let header = ReassemblyHeader::from_wire(bytes).expect("header decodes");
        assert_eq!(header, *operation.header());

        for (position, (subject, bytes)) in published[1..].iter().enumerate() {
            assert_eq!(subject, "fragcast.fragments.ingest");
            let fragment = Fragment::from_wire(bytes).expect("fragment decodes");
            assert_eq!(fragment.index.get() as usize, position);
        }
    }

    #[rstest]
    #[case::header(0, 0)]
    #[case::second_fragment(2, 1)]
    #[tokio::test]
    async fn first_failure_aborts(#[case] limit: usize, #[case] published: usize) {
        let transport = Arc::new(RecordingTransport::failing_after(limit));
        let broadcaster = Broadcaster::new(Arc::clone(&transport), Subjects::default());

        let err = broadcaster
            .send(&fragmenter(4), b"0123456789")
            .await
            .expect_err("publish fails");
        assert_eq!(err.published(), published);
        if limit == 0 {
            assert!(matches!(err, BroadcastError::Header(_)));
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), limit + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_rate_spreads_fragments_over_time() {
        let transport = Arc::new(RecordingTransport::default());
        let broadcaster = Broadcaster::new(Arc::clone(&transport), Subjects::default())
            .with_publish_rate(NonZeroUsize::new(2));

        let start = tokio::time::Instant::now();
        broadcaster
            .send(&fragmenter(1), b"abcd")
            .await
            .expect("broadcast");
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(transport.published.lock().await.len(), 5);
    }
}
