//! Unit tests for fragment ingestion.

use std::sync::Arc;

use rstest::rstest;

use super::*;
use crate::{
    fragment::{Fragment, FragmentIndex, OperationIdentity},
    keys::KeyPurpose,
    store::MemoryStore,
    test_helpers::{FlakyStore, batch, keys, payload, store},
};

fn ingestor(store: &Arc<FlakyStore>, keys: KeyDeriver) -> Ingestor<FlakyStore> {
    Ingestor::new(Arc::clone(store), keys)
}

async fn count(store: &FlakyStore, keys: &KeyDeriver, identity: &OperationIdentity) -> Option<i64> {
    store
        .inner
        .get(&keys.ingest_count_key(identity))
        .await
        .expect("store get")
        .as_deref()
        .and_then(decode_counter)
}

fn operation_identity(fragment: &Fragment) -> OperationIdentity {
    fragment.identity().expect("valid fragment").operation_scope()
}

#[rstest]
#[tokio::test]
async fn out_of_order_ingestion_counts_every_fragment(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(10), 4, 1);
    let fragments = batch.fragments();
    assert_eq!(fragments.len(), 3);
    let ingestor = ingestor(&store, keys.clone());

    let mut outcomes = Vec::new();
    for position in [2, 0, 1] {
        outcomes.push(ingestor.ingest(&fragments[position]).await.expect("ingest"));
    }

    let counts: Vec<i64> = outcomes.iter().map(|o| o.ingested).collect();
    assert_eq!(counts, vec![1, 2, 3]);
    assert!(outcomes[2].completes_operation());
    assert!(!outcomes[0].completes_operation());
    assert_eq!(count(&store, &keys, &operation_identity(&fragments[0])).await, Some(3));

    for fragment in fragments {
        let identity = operation_identity(fragment);
        let stored = store
            .inner
            .get(&keys.persistence_key(&identity, fragment.index))
            .await
            .expect("store get")
            .expect("fragment persisted");
        assert_eq!(Fragment::from_wire(&stored).expect("decode"), *fragment);
    }
}

#[rstest]
#[tokio::test]
async fn corrupted_fragment_is_rejected_without_side_effects(
    store: Arc<FlakyStore>,
    keys: KeyDeriver,
) {
    let batch = batch(&payload(10), 4, 2);
    let mut corrupted = batch.fragments()[1].clone();
    corrupted.payload[0] ^= 0xff;

    let err = ingestor(&store, keys)
        .ingest(&corrupted)
        .await
        .expect_err("corrupted fragment must fail");
    assert!(matches!(
        err,
        IngestError::ChecksumMismatch { index, .. } if index == FragmentIndex::new(1)
    ));
    assert!(err.is_retryable());
    assert!(store.inner.is_empty(), "nothing may be written");
}

#[rstest]
#[tokio::test]
async fn out_of_range_index_is_malformed(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(10), 4, 3);
    let mut fragment = batch.fragments()[0].clone();
    fragment.index = FragmentIndex::new(fragment.cardinality);

    let err = ingestor(&store, keys)
        .ingest(&fragment)
        .await
        .expect_err("index outside cardinality");
    assert!(matches!(
        err,
        IngestError::Malformed(ValidationError::IndexOutOfRange { .. })
    ));
    assert!(!err.is_retryable());
    assert_eq!(err.reason(), "malformed");
    assert!(store.inner.is_empty());
}

#[rstest]
#[tokio::test]
async fn truncated_checksum_is_malformed(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(3), 4, 4);
    let mut fragment = batch.fragments()[0].clone();
    fragment.checksum.truncate(8);

    let err = ingestor(&store, keys)
        .ingest(&fragment)
        .await
        .expect_err("short checksum");
    assert!(matches!(
        err,
        IngestError::Malformed(ValidationError::ChecksumLength { .. })
    ));
    assert!(store.inner.is_empty());
}

#[rstest]
#[tokio::test]
async fn redelivered_fragment_is_counted_once(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(10), 4, 5);
    let fragment = &batch.fragments()[0];
    let ingestor = ingestor(&store, keys.clone());

    let first = ingestor.ingest(fragment).await.expect("first delivery");
    let second = ingestor.ingest(fragment).await.expect("redelivery");

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.ingested, 1);
    assert!(!second.completes_operation());
    assert_eq!(count(&store, &keys, &operation_identity(fragment)).await, Some(1));
}

#[rstest]
#[tokio::test]
async fn redelivery_leaves_persisted_fragment_unchanged(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(10), 4, 10);
    let fragment = &batch.fragments()[1];
    let ingestor = ingestor(&store, keys.clone());
    let key = keys.persistence_key(&operation_identity(fragment), fragment.index);

    ingestor.ingest(fragment).await.expect("first delivery");
    let before = store.inner.get(&key).await.expect("store get");
    ingestor.ingest(fragment).await.expect("redelivery");
    let after = store.inner.get(&key).await.expect("store get");

    assert!(before.is_some());
    assert_eq!(before, after);
    assert_eq!(
        Fragment::from_wire(&after.expect("fragment persisted")).expect("decode"),
        *fragment
    );
}

#[rstest]
#[tokio::test]
async fn failed_count_is_retried_on_redelivery(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(3), 4, 11);
    let fragment = &batch.fragments()[0];
    let ingestor = ingestor(&store, keys.clone());
    store.fail_increment(KeyPurpose::IngestCount, 1);

    let err = ingestor
        .ingest(fragment)
        .await
        .expect_err("counter increment fails");
    assert!(matches!(err, IngestError::Store(_)));
    assert!(err.is_retryable());
    assert_eq!(count(&store, &keys, &operation_identity(fragment)).await, None);

    let retried = ingestor.ingest(fragment).await.expect("redelivery");
    assert!(!retried.duplicate);
    assert_eq!(retried.ingested, 1);
    assert!(retried.completes_operation());

    let repeated = ingestor.ingest(fragment).await.expect("second redelivery");
    assert!(repeated.duplicate);
    assert_eq!(count(&store, &keys, &operation_identity(fragment)).await, Some(1));
}

#[rstest]
#[tokio::test]
async fn claimed_marker_without_counter_is_counted(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(3), 4, 12);
    let fragment = &batch.fragments()[0];
    let identity = operation_identity(fragment);
    store
        .inner
        .set(
            &keys.ingest_marker_key(&identity, fragment.index),
            encode_counter(1),
            None,
        )
        .await
        .expect("store set");

    let outcome = ingestor(&store, keys.clone())
        .ingest(fragment)
        .await
        .expect("ingest");
    assert!(!outcome.duplicate);
    assert!(outcome.completes_operation());
    assert_eq!(count(&store, &keys, &identity).await, Some(1));
}

#[rstest]
#[tokio::test]
async fn redelivery_of_final_fragment_does_not_report_completion_twice(
    store: Arc<FlakyStore>,
    keys: KeyDeriver,
) {
    let batch = batch(&payload(3), 4, 6);
    let fragment = &batch.fragments()[0];
    let ingestor = ingestor(&store, keys);

    assert!(ingestor.ingest(fragment).await.expect("first").completes_operation());
    assert!(!ingestor.ingest(fragment).await.expect("second").completes_operation());
}

#[rstest]
#[tokio::test]
async fn disabling_dedupe_counts_every_delivery(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(10), 4, 7);
    let fragment = &batch.fragments()[0];
    let ingestor = ingestor(&store, keys.clone()).dedupe_redeliveries(false);

    ingestor.ingest(fragment).await.expect("first delivery");
    let second = ingestor.ingest(fragment).await.expect("redelivery");

    assert!(!second.duplicate);
    assert_eq!(second.ingested, 2);
    assert_eq!(count(&store, &keys, &operation_identity(fragment)).await, Some(2));
}

#[rstest]
#[tokio::test]
async fn persistence_failure_leaves_counter_untouched(store: Arc<FlakyStore>, keys: KeyDeriver) {
    let batch = batch(&payload(10), 4, 8);
    let fragment = &batch.fragments()[0];
    store.fail_set(true);

    let err = ingestor(&store, keys.clone())
        .ingest(fragment)
        .await
        .expect_err("store rejects writes");
    assert!(matches!(err, IngestError::Store(_)));
    assert!(err.is_retryable());
    assert_eq!(count(&store, &keys, &operation_identity(fragment)).await, None);
}

#[rstest]
#[tokio::test]
async fn fragments_expire_with_configured_ttl(keys: KeyDeriver) {
    tokio::time::pause();
    let store = Arc::new(MemoryStore::new());
    let batch = batch(&payload(3), 4, 9);
    let fragment = &batch.fragments()[0];
    let ingestor =
        Ingestor::new(Arc::clone(&store), keys.clone()).with_ttl(Some(Duration::from_secs(10)));
    ingestor.ingest(fragment).await.expect("ingest");

    let key = keys.persistence_key(&operation_identity(fragment), fragment.index);
    assert!(store.get(&key).await.expect("get").is_some());
    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(store.get(&key).await.expect("get").is_none());
}
