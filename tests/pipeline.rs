//! End-to-end tests driving broadcast, ingestion and reassembly over the
//! in-process bus and store.

mod common;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use common::{Pipeline, TestResult, fragmenter, payload, test_config};
use fragcast::{
    Broadcaster,
    ReassemblyError,
    ReassemblyOperation,
    Reassembler,
    Transport,
    WireRecord,
};
use rstest::rstest;

#[rstest]
#[case::empty(0, 16)]
#[case::single_fragment(100, 4500)]
#[case::exact_multiple(64, 16)]
#[case::short_tail(10_000, 4500)]
#[tokio::test]
async fn broadcast_payload_is_reassembled(
    #[case] len: usize,
    #[case] chunk: usize,
) -> TestResult {
    let mut pipeline = Pipeline::start(test_config()).await?;
    let broadcaster = Broadcaster::new(Arc::clone(&pipeline.bus), pipeline.config.subjects.clone());
    let original = payload(len);

    let operation = broadcaster.send(&fragmenter(chunk), &original).await?;
    let packet = pipeline.next_packet(Duration::from_secs(5)).await?;

    assert_eq!(packet.nonce(), operation.nonce());
    assert_eq!(packet.payload(), original.as_slice());
    pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_broadcasts_are_kept_apart() -> TestResult {
    let mut pipeline = Pipeline::start(test_config()).await?;
    let broadcaster = Broadcaster::new(Arc::clone(&pipeline.bus), pipeline.config.subjects.clone());
    let fragmenter = fragmenter(32);
    let first = payload(500);
    let second: Vec<u8> = payload(700).into_iter().rev().collect();

    let (a, b) = tokio::join!(
        broadcaster.send(&fragmenter, &first),
        broadcaster.send(&fragmenter, &second),
    );
    let (a, b) = (a?, b?);
    assert_ne!(a.nonce(), b.nonce());

    let mut received = Vec::new();
    for _ in 0..2 {
        received.push(pipeline.next_packet(Duration::from_secs(5)).await?);
    }
    received.sort_by_key(|packet| packet.payload().len());
    assert_eq!(received[0].payload(), first.as_slice());
    assert_eq!(received[1].payload(), second.as_slice());
    pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_fragment_publications_do_not_break_reassembly() -> TestResult {
    let mut pipeline = Pipeline::start(test_config()).await?;
    let subjects = pipeline.config.subjects.clone();
    let original = payload(300);
    let batch = fragmenter(64).fragment(&original)?;

    for fragment in batch.fragments() {
        let bytes = Bytes::from(fragment.to_wire()?);
        pipeline
            .bus
            .publish(&subjects.fragment_ingest, bytes.clone())
            .await?;
        pipeline.bus.publish(&subjects.fragment_ingest, bytes).await?;
    }
    pipeline
        .bus
        .publish(&subjects.reassembly, Bytes::from(batch.header().to_wire()?))
        .await?;

    let packet = pipeline.next_packet(Duration::from_secs(5)).await?;
    assert_eq!(packet.payload(), original.as_slice());

    let reassembler = Reassembler::new(Arc::clone(&pipeline.store), pipeline.config.key_deriver());
    let count = reassembler
        .ingested_count(&batch.header().identity()?)
        .await?;
    assert_eq!(count, i64::from(batch.header().cardinality));
    pipeline.stop().await;
    Ok(())
}

#[tokio::test]
async fn corrupted_fragment_leaves_operation_incomplete() -> TestResult {
    let mut config = test_config();
    config.ingest.max_deliveries = 2;
    config.reassembly.max_deliveries = 3;
    let pipeline = Pipeline::start(config).await?;
    let subjects = pipeline.config.subjects.clone();
    let batch = fragmenter(4).fragment(payload(12))?;

    let mut fragments = batch.fragments().to_vec();
    fragments[1].payload[0] ^= 0x55;
    for fragment in &fragments {
        pipeline
            .bus
            .publish(&subjects.fragment_ingest, Bytes::from(fragment.to_wire()?))
            .await?;
    }

    let group = &pipeline.config.ingest.queue_group;
    let reassembler = Reassembler::new(Arc::clone(&pipeline.store), pipeline.config.key_deriver());
    let identity = batch.header().identity()?;
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.bus.dead_letters(&subjects.fragment_ingest, group) == 0
            || reassembler.ingested_count(&identity).await.ok() != Some(2)
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    let mut operation = ReassemblyOperation::from(batch.header().clone());
    let err = reassembler
        .reassemble(&mut operation)
        .await
        .expect_err("corrupted fragment is never counted");
    assert!(matches!(
        err,
        ReassemblyError::Incomplete {
            ingested: 2,
            cardinality: 3
        }
    ));
    pipeline.stop().await;
    Ok(())
}
