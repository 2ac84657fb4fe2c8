use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::DispatchError;

/// A raw message as handed out by the broker, before decoding.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub correlation_id: Option<String>,
    pub redelivered: bool,
    pub payload: Vec<u8>,
}

/// Settles deliveries on the channel they arrived on.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), DispatchError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), DispatchError>;

    /// Drops a delivery for good (undecodable payloads).
    async fn reject(&self, delivery_tag: u64) -> Result<(), DispatchError>;
}

/// One live connection+channel consuming a single queue.
///
/// The stream ends or yields an error once the connection or channel is gone;
/// unacknowledged deliveries are then requeued by the broker.
pub struct ConsumerSession {
    pub acknowledger: Arc<dyn Acknowledger>,
    pub deliveries: BoxStream<'static, Result<Delivery, DispatchError>>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Connects, declares `queue` (idempotent) and starts a manual-ack consumer.
    async fn open_session(&self, queue: &str) -> Result<ConsumerSession, DispatchError>;
}

#[async_trait]
pub trait QueuePublisher: Send + Sync {
    /// Declaring an existing queue with the same arguments is a no-op.
    async fn declare_queue(&self, queue: &str) -> Result<(), DispatchError>;

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        correlation_id: &str,
    ) -> Result<(), DispatchError>;
}
