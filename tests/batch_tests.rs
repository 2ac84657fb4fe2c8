use std::{sync::Arc, time::Duration};

use anyhow::Result;
use notification_dispatcher::{
    dispatch::{Acknowledger, BatchSettings, ChannelConsumer, FlushReport},
    error::DispatchError,
    models::channel::{Channel, ConsumerState, FailurePolicy},
};
use tokio::time::{advance, sleep};
use tokio_util::sync::CancellationToken;

use crate::support::{RecordingAcknowledger, RecordingProcessor, Settlement, envelope};

fn consumer(
    processor: Arc<RecordingProcessor>,
    policy: FailurePolicy,
    size: usize,
) -> Arc<ChannelConsumer> {
    Arc::new(ChannelConsumer::new(
        Channel::Forward,
        "forward_queue",
        processor,
        policy,
        BatchSettings {
            size,
            timeout: Duration::from_secs(10),
        },
    ))
}

/// Test: Reaching the size threshold flushes immediately
#[tokio::test(start_paused = true)]
async fn test_flush_on_size_threshold() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 3);

    assert_eq!(consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await?, None);
    assert_eq!(consumer.push(envelope(2, "U2"), acknowledger.as_ref()).await?, None);
    assert_eq!(consumer.pending().await, 2);
    assert!(processor.seen().await.is_empty());

    let report = consumer.push(envelope(3, "U3"), acknowledger.as_ref()).await?;

    assert_eq!(
        report,
        Some(FlushReport {
            processed: 3,
            acked: 3,
            requeued: 0,
            failed: 0,
        })
    );
    assert_eq!(consumer.pending().await, 0);
    assert_eq!(
        acknowledger.settlements().await,
        vec![Settlement::Ack(1), Settlement::Ack(2), Settlement::Ack(3)]
    );

    Ok(())
}

/// Test: A partial batch flushes once the timeout has elapsed
#[tokio::test(start_paused = true)]
async fn test_flush_on_timeout() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 100);

    consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await?;

    advance(Duration::from_secs(9)).await;
    assert_eq!(consumer.flush_if_due(acknowledger.as_ref()).await?, None);
    assert!(processor.seen().await.is_empty());

    advance(Duration::from_secs(1)).await;
    let report = consumer.flush_if_due(acknowledger.as_ref()).await?;

    assert_eq!(report.map(|r| r.processed), Some(1));
    assert_eq!(processor.seen().await, vec!["U1"]);

    Ok(())
}

/// Test: The background timer flushes without any further deliveries
#[tokio::test(start_paused = true)]
async fn test_flush_timer_flushes_idle_batch() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 100);
    let stop = CancellationToken::new();

    let timer = tokio::spawn(Arc::clone(&consumer).run_flush_timer(
        Arc::clone(&acknowledger) as Arc<dyn Acknowledger>,
        stop.clone(),
    ));

    consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await?;
    consumer.push(envelope(2, "U2"), acknowledger.as_ref()).await?;

    sleep(Duration::from_secs(11)).await;

    assert_eq!(processor.seen().await, vec!["U1", "U2"]);
    assert_eq!(
        acknowledger.settlements().await,
        vec![Settlement::Ack(1), Settlement::Ack(2)]
    );

    stop.cancel();
    timer.await??;

    Ok(())
}

/// Test: A size-triggered flush restarts the timeout window
#[tokio::test(start_paused = true)]
async fn test_size_flush_resets_timer() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 2);

    advance(Duration::from_secs(6)).await;
    consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await?;
    consumer.push(envelope(2, "U2"), acknowledger.as_ref()).await?;
    consumer.push(envelope(3, "U3"), acknowledger.as_ref()).await?;

    advance(Duration::from_secs(5)).await;
    assert_eq!(
        consumer.flush_if_due(acknowledger.as_ref()).await?,
        None,
        "Only 5s since the size flush"
    );

    advance(Duration::from_secs(5)).await;
    let report = consumer.flush_if_due(acknowledger.as_ref()).await?;
    assert_eq!(report.map(|r| r.processed), Some(1));

    Ok(())
}

/// Test: An empty timed flush is a no-op that still resets the timer
#[tokio::test(start_paused = true)]
async fn test_empty_flush_resets_timer() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 100);

    advance(Duration::from_secs(10)).await;
    assert_eq!(
        consumer.flush_if_due(acknowledger.as_ref()).await?,
        Some(FlushReport::default())
    );
    assert!(acknowledger.settlements().await.is_empty());

    consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await?;
    advance(Duration::from_secs(5)).await;
    assert_eq!(consumer.flush_if_due(acknowledger.as_ref()).await?, None);

    Ok(())
}

/// Test: Only the failed message is requeued; its neighbours are acked
#[tokio::test(start_paused = true)]
async fn test_partial_failure_requeues_only_failed_message() -> Result<()> {
    let processor = RecordingProcessor::new();
    processor.fail("U3", 1).await;
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 5);

    let mut report = None;
    for (tag, id) in [(1, "U1"), (2, "U2"), (3, "U3"), (4, "U4"), (5, "U5")] {
        report = consumer.push(envelope(tag, id), acknowledger.as_ref()).await?;
    }

    assert_eq!(
        report,
        Some(FlushReport {
            processed: 5,
            acked: 4,
            requeued: 1,
            failed: 1,
        })
    );
    assert_eq!(
        acknowledger.settlements().await,
        vec![
            Settlement::Ack(1),
            Settlement::Ack(2),
            Settlement::Nack {
                tag: 3,
                requeue: true
            },
            Settlement::Ack(4),
            Settlement::Ack(5),
        ]
    );

    Ok(())
}

/// Test: Best-effort channels acknowledge failed messages
#[tokio::test(start_paused = true)]
async fn test_acknowledge_policy_acks_failures() -> Result<()> {
    let processor = RecordingProcessor::new();
    processor.fail("U2", 1).await;
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Acknowledge, 3);

    consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await?;
    consumer.push(envelope(2, "U2"), acknowledger.as_ref()).await?;
    let report = consumer.push(envelope(3, "U3"), acknowledger.as_ref()).await?;

    assert_eq!(
        report,
        Some(FlushReport {
            processed: 3,
            acked: 3,
            requeued: 0,
            failed: 1,
        })
    );
    assert!(
        acknowledger
            .settlements()
            .await
            .iter()
            .all(|s| matches!(s, Settlement::Ack(_)))
    );

    Ok(())
}

/// Test: Messages are processed in arrival order
#[tokio::test(start_paused = true)]
async fn test_batch_preserves_arrival_order() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 4);

    for (tag, id) in [(1, "D"), (2, "B"), (3, "A"), (4, "C")] {
        consumer.push(envelope(tag, id), acknowledger.as_ref()).await?;
    }

    assert_eq!(processor.seen().await, vec!["D", "B", "A", "C"]);

    Ok(())
}

/// Test: Concurrent flush triggers never process the same batch twice
#[tokio::test(start_paused = true)]
async fn test_flushes_are_serialized() -> Result<()> {
    let processor = RecordingProcessor::with_delay(Duration::from_secs(1));
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 100);

    for tag in 1..=3 {
        consumer
            .push(envelope(tag, &format!("U{}", tag)), acknowledger.as_ref())
            .await?;
    }

    let (first, second) = tokio::join!(
        consumer.flush(acknowledger.as_ref()),
        consumer.flush(acknowledger.as_ref())
    );

    let mut processed = vec![first?.processed, second?.processed];
    processed.sort_unstable();

    assert_eq!(processed, vec![0, 3]);
    assert_eq!(processor.max_in_flight(), 1);
    assert_eq!(processor.seen().await.len(), 3);

    Ok(())
}

/// Test: A settle failure aborts the flush with a channel error
#[tokio::test(start_paused = true)]
async fn test_ack_failure_surfaces_channel_error() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    acknowledger.fail_all();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 1);

    let result = consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await;

    assert!(matches!(result, Err(DispatchError::Channel(_))));
    assert_eq!(consumer.pending().await, 0);

    Ok(())
}

/// Test: Flushing leaves the consumer back in the consuming state
#[tokio::test(start_paused = true)]
async fn test_flush_returns_to_consuming_state() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 10);

    assert_eq!(consumer.state(), ConsumerState::Disconnected);

    consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await?;
    consumer.flush(acknowledger.as_ref()).await?;

    assert_eq!(consumer.state(), ConsumerState::Consuming);

    Ok(())
}

/// Test: Envelopes from a dead channel are dropped rather than settled
#[tokio::test(start_paused = true)]
async fn test_discard_pending_drops_stale_batch() -> Result<()> {
    let processor = RecordingProcessor::new();
    let acknowledger = RecordingAcknowledger::new();
    let consumer = consumer(Arc::clone(&processor), FailurePolicy::Requeue, 10);

    consumer.push(envelope(1, "U1"), acknowledger.as_ref()).await?;
    consumer.push(envelope(2, "U2"), acknowledger.as_ref()).await?;

    assert_eq!(consumer.discard_pending().await, 2);
    assert_eq!(consumer.flush(acknowledger.as_ref()).await?, FlushReport::default());
    assert!(processor.seen().await.is_empty());
    assert!(acknowledger.settlements().await.is_empty());

    Ok(())
}
