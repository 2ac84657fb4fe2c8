use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dispatch::{
        batch::ChannelConsumer,
        broker::{Acknowledger, Broker, ConsumerSession, Delivery},
    },
    error::DispatchError,
    models::{
        channel::ConsumerState,
        message::{ChannelEnvelope, QueuedNotification},
    },
};

/// Keeps one channel's consumer attached to the broker for the life of the
/// process.
///
/// A failed connect is retried after `reconnect_delay`; a session that dies
/// mid-consumption is reopened immediately. Only an unrecoverable error ends
/// `run` early, and it ends it for this channel alone.
pub struct ConnectionSupervisor {
    broker: Arc<dyn Broker>,
    consumer: Arc<ChannelConsumer>,
    reconnect_delay: Duration,
}

impl ConnectionSupervisor {
    pub fn new(
        broker: Arc<dyn Broker>,
        consumer: Arc<ChannelConsumer>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            broker,
            consumer,
            reconnect_delay,
        }
    }

    pub fn consumer(&self) -> &Arc<ChannelConsumer> {
        &self.consumer
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), DispatchError> {
        let queue = self.consumer.queue().to_string();

        while !shutdown.is_cancelled() {
            self.consumer.set_state(ConsumerState::Connecting);

            let opened = tokio::select! {
                _ = shutdown.cancelled() => break,
                opened = self.broker.open_session(&queue) => opened,
            };

            let session = match opened {
                Ok(session) => session,
                Err(e) if e.is_recoverable() => {
                    self.consumer.set_state(ConsumerState::Disconnected);
                    warn!(
                        queue = %queue,
                        error = %e,
                        retry_in_secs = self.reconnect_delay.as_secs(),
                        "Failed to connect to broker, retrying"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.reconnect_delay) => continue,
                    }
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Unrecoverable broker error, stopping consumer");
                    self.consumer.set_state(ConsumerState::Stopped);
                    return Err(e);
                }
            };

            let stale = self.consumer.discard_pending().await;
            if stale > 0 {
                warn!(queue = %queue, discarded = stale, "Dropped batch from closed channel, broker will redeliver");
            }

            self.consumer.set_state(ConsumerState::Consuming);
            info!(queue = %queue, "Started consuming");

            match self.consume(session, &shutdown).await {
                Ok(()) => break,
                Err(e) if e.is_recoverable() => {
                    self.consumer.set_state(ConsumerState::Disconnected);
                    warn!(queue = %queue, error = %e, "Consumer session ended, reopening");
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Unrecoverable consumer error, stopping consumer");
                    self.consumer.set_state(ConsumerState::Stopped);
                    return Err(e);
                }
            }
        }

        self.consumer.set_state(ConsumerState::Stopped);
        info!(queue = %queue, "Consumer stopped");

        Ok(())
    }

    /// Drives one session. Returns `Ok` only after a shutdown-triggered final
    /// flush.
    async fn consume(
        &self,
        session: ConsumerSession,
        shutdown: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let ConsumerSession {
            acknowledger,
            mut deliveries,
        } = session;

        let timer_stop = CancellationToken::new();
        let timer = tokio::spawn(
            Arc::clone(&self.consumer).run_flush_timer(Arc::clone(&acknowledger), timer_stop.clone()),
        );

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(queue = %self.consumer.queue(), "Shutdown requested, flushing pending batch");
                    break self.consumer.flush(acknowledger.as_ref()).await.map(|_| ());
                }
                _ = timer_stop.cancelled() => {
                    break Err(DispatchError::Channel("flush timer could not settle deliveries".to_string()));
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.handle_delivery(delivery, acknowledger.as_ref()).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Err(DispatchError::ConnectionLost("delivery stream closed".to_string())),
                },
            }
        };

        timer_stop.cancel();
        match timer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(queue = %self.consumer.queue(), error = %e, "Flush timer ended with error"),
            Err(e) => warn!(queue = %self.consumer.queue(), error = %e, "Flush timer task failed"),
        }

        outcome
    }

    async fn handle_delivery(
        &self,
        delivery: Delivery,
        acknowledger: &dyn Acknowledger,
    ) -> Result<(), DispatchError> {
        let message = match serde_json::from_slice::<QueuedNotification>(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    queue = %self.consumer.queue(),
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Undecodable message, rejecting without requeue"
                );
                return acknowledger.reject(delivery.delivery_tag).await;
            }
        };

        let correlation_id = delivery
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        debug!(
            queue = %self.consumer.queue(),
            correlation_id = %correlation_id,
            redelivered = delivery.redelivered,
            "Message received"
        );

        let envelope = ChannelEnvelope {
            delivery_tag: delivery.delivery_tag,
            correlation_id,
            message,
        };

        self.consumer.push(envelope, acknowledger).await.map(|_| ())
    }
}
