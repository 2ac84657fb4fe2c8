use std::{mem, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, watch},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dispatch::broker::Acknowledger,
    error::DispatchError,
    models::{
        channel::{Channel, ConsumerState, FailurePolicy},
        message::ChannelEnvelope,
    },
    processors::Processor,
};

/// Size-or-timeout flush policy for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub size: usize,
    pub timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            size: 100,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome counts of a single flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub processed: usize,
    pub acked: usize,
    pub requeued: usize,
    pub failed: usize,
}

struct BatchState {
    envelopes: Vec<ChannelEnvelope>,
    last_flush: Instant,
}

/// Per-channel batching consumer.
///
/// The pending batch and its last-flush marker sit behind one async lock, so
/// the delivery path and the flush timer never flush at the same time. The lock
/// is held for the whole flush, processor calls included.
pub struct ChannelConsumer {
    channel: Channel,
    queue: String,
    processor: Arc<dyn Processor>,
    failure_policy: FailurePolicy,
    settings: BatchSettings,
    batch: Mutex<BatchState>,
    state: watch::Sender<ConsumerState>,
}

impl ChannelConsumer {
    pub fn new(
        channel: Channel,
        queue: impl Into<String>,
        processor: Arc<dyn Processor>,
        failure_policy: FailurePolicy,
        settings: BatchSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);

        Self {
            channel,
            queue: queue.into(),
            processor,
            failure_policy,
            settings,
            batch: Mutex::new(BatchState {
                envelopes: Vec::with_capacity(settings.size),
                last_flush: Instant::now(),
            }),
            state,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn settings(&self) -> BatchSettings {
        self.settings
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(queue = %self.queue, from = %previous, to = %state, "Consumer state changed");
        }
    }

    pub async fn pending(&self) -> usize {
        self.batch.lock().await.envelopes.len()
    }

    /// Appends an envelope and flushes when the batch reaches its size threshold.
    pub async fn push(
        &self,
        envelope: ChannelEnvelope,
        acknowledger: &dyn Acknowledger,
    ) -> Result<Option<FlushReport>, DispatchError> {
        let mut batch = self.batch.lock().await;
        batch.envelopes.push(envelope);

        if batch.envelopes.len() >= self.settings.size {
            debug!(queue = %self.queue, size = batch.envelopes.len(), "Batch size threshold reached");
            return self.flush_locked(&mut batch, acknowledger).await.map(Some);
        }

        Ok(None)
    }

    /// Flushes if the timeout has elapsed since the last flush. Empty batches
    /// still reset the timer.
    pub async fn flush_if_due(
        &self,
        acknowledger: &dyn Acknowledger,
    ) -> Result<Option<FlushReport>, DispatchError> {
        let mut batch = self.batch.lock().await;

        if batch.last_flush.elapsed() < self.settings.timeout {
            return Ok(None);
        }

        self.flush_locked(&mut batch, acknowledger).await.map(Some)
    }

    /// Unconditional flush, used on shutdown.
    pub async fn flush(&self, acknowledger: &dyn Acknowledger) -> Result<FlushReport, DispatchError> {
        let mut batch = self.batch.lock().await;
        self.flush_locked(&mut batch, acknowledger).await
    }

    pub async fn next_flush_deadline(&self) -> Instant {
        self.batch.lock().await.last_flush + self.settings.timeout
    }

    /// Drops envelopes buffered from a channel that no longer exists. Their
    /// delivery tags cannot be settled on a new channel; the broker has already
    /// requeued them.
    pub async fn discard_pending(&self) -> usize {
        let mut batch = self.batch.lock().await;
        let discarded = batch.envelopes.len();
        batch.envelopes.clear();
        batch.last_flush = Instant::now();
        discarded
    }

    /// Timer side of the flush policy. Runs until `stop` is cancelled; on a
    /// settle failure it cancels `stop` itself so the session restarts.
    pub async fn run_flush_timer(
        self: Arc<Self>,
        acknowledger: Arc<dyn Acknowledger>,
        stop: CancellationToken,
    ) -> Result<(), DispatchError> {
        loop {
            let deadline = self.next_flush_deadline().await;

            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = sleep_until(deadline) => {}
            }

            if let Err(e) = self.flush_if_due(acknowledger.as_ref()).await {
                warn!(queue = %self.queue, error = %e, "Timed flush failed, stopping timer");
                stop.cancel();
                return Err(e);
            }
        }
    }

    async fn flush_locked(
        &self,
        batch: &mut BatchState,
        acknowledger: &dyn Acknowledger,
    ) -> Result<FlushReport, DispatchError> {
        if batch.envelopes.is_empty() {
            batch.last_flush = Instant::now();
            return Ok(FlushReport::default());
        }

        self.set_state(ConsumerState::Flushing);

        let envelopes = mem::replace(
            &mut batch.envelopes,
            Vec::with_capacity(self.settings.size),
        );
        let result = self.process_batch(envelopes, acknowledger).await;

        batch.last_flush = Instant::now();
        self.set_state(ConsumerState::Consuming);

        let report = result?;
        info!(
            queue = %self.queue,
            channel = %self.channel,
            processed = report.processed,
            acked = report.acked,
            requeued = report.requeued,
            failed = report.failed,
            "Batch flushed"
        );

        Ok(report)
    }

    async fn process_batch(
        &self,
        envelopes: Vec<ChannelEnvelope>,
        acknowledger: &dyn Acknowledger,
    ) -> Result<FlushReport, DispatchError> {
        let mut report = FlushReport::default();

        for envelope in envelopes {
            report.processed += 1;

            match self.processor.process(&envelope.message).await {
                Ok(()) => {
                    acknowledger.ack(envelope.delivery_tag).await?;
                    report.acked += 1;
                }
                Err(e) => {
                    report.failed += 1;

                    match self.failure_policy {
                        FailurePolicy::Requeue => {
                            warn!(
                                queue = %self.queue,
                                correlation_id = %envelope.correlation_id,
                                unique_id = %envelope.message.notification.unique_id,
                                error = %e,
                                "Processing failed, requeueing message"
                            );
                            acknowledger.nack(envelope.delivery_tag, true).await?;
                            report.requeued += 1;
                        }
                        FailurePolicy::Acknowledge => {
                            warn!(
                                queue = %self.queue,
                                correlation_id = %envelope.correlation_id,
                                unique_id = %envelope.message.notification.unique_id,
                                error = %e,
                                "Processing failed, acknowledging anyway"
                            );
                            acknowledger.ack(envelope.delivery_tag).await?;
                            report.acked += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }
}
