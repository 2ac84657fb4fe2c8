use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    dispatch::broker::{Acknowledger, Broker, ConsumerSession, Delivery, QueuePublisher},
    error::DispatchError,
};

/// One AMQP connection with a single channel on it.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
}

impl RabbitMqClient {
    pub async fn connect(url: &str, prefetch_count: u16) -> Result<Self, DispatchError> {
        debug!("Connecting to RabbitMQ");

        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| DispatchError::Connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| DispatchError::Connection(format!("channel creation failed: {}", e)))?;

        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| DispatchError::Channel(format!("failed to set prefetch: {}", e)))?;

        info!(prefetch_count, "RabbitMQ channel established");

        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Puts the channel in confirm mode so every publish waits for the broker.
    pub async fn enable_confirms(&self) -> Result<(), DispatchError> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| DispatchError::Channel(format!("failed to enable confirms: {}", e)))
    }

    pub async fn declare_queue(&self, queue: &str) -> Result<(), DispatchError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| DispatchError::Channel(format!("failed to declare {}: {}", queue, e)))?;

        debug!(queue, "Queue declared");
        Ok(())
    }

    pub async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        correlation_id: &str,
    ) -> Result<(), DispatchError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_correlation_id(correlation_id.into());

        let publish_error = |reason: String| DispatchError::Publish {
            queue: queue.to_string(),
            reason,
        };

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| publish_error(e.to_string()))?
            .await
            .map_err(|e| publish_error(e.to_string()))?;

        match confirmation {
            Confirmation::Nack(_) => {
                Err(publish_error("broker did not confirm the message".to_string()))
            }
            Confirmation::Ack(_) | Confirmation::NotRequested => Ok(()),
        }
    }
}

#[async_trait]
impl Acknowledger for RabbitMqClient {
    async fn ack(&self, delivery_tag: u64) -> Result<(), DispatchError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| DispatchError::Channel(format!("ack failed: {}", e)))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), DispatchError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DispatchError::Channel(format!("nack failed: {}", e)))
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), DispatchError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| DispatchError::Channel(format!("reject failed: {}", e)))
    }
}

/// Opens a fresh connection per consumer session.
pub struct RabbitMqBroker {
    url: String,
    prefetch_count: u16,
}

impl RabbitMqBroker {
    pub fn new(url: impl Into<String>, prefetch_count: u16) -> Self {
        Self {
            url: url.into(),
            prefetch_count,
        }
    }
}

#[async_trait]
impl Broker for RabbitMqBroker {
    async fn open_session(&self, queue: &str) -> Result<ConsumerSession, DispatchError> {
        let client = RabbitMqClient::connect(&self.url, self.prefetch_count).await?;
        client.declare_queue(queue).await?;

        let consumer = client
            .channel
            .basic_consume(
                queue,
                &format!("{}_dispatcher", queue),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| DispatchError::Channel(format!("failed to start consumer: {}", e)))?;

        info!(queue, "Consumer registered");

        let deliveries = consumer
            .map(|result| match result {
                Ok(delivery) => Ok(Delivery {
                    delivery_tag: delivery.delivery_tag,
                    correlation_id: delivery
                        .properties
                        .correlation_id()
                        .as_ref()
                        .map(|id| id.as_str().to_string()),
                    redelivered: delivery.redelivered,
                    payload: delivery.data,
                }),
                Err(e) => Err(DispatchError::ConnectionLost(e.to_string())),
            })
            .boxed();

        Ok(ConsumerSession {
            acknowledger: Arc::new(client),
            deliveries,
        })
    }
}

/// Publisher used by the ingestion endpoint. Holds one lazily (re)opened
/// connection in confirm mode and declares every channel queue whenever it
/// connects. A publish returns only once the broker has confirmed it.
pub struct RabbitMqPublisher {
    url: String,
    queues: Vec<String>,
    client: Mutex<Option<RabbitMqClient>>,
}

impl RabbitMqPublisher {
    pub fn new(url: impl Into<String>, queues: Vec<String>) -> Self {
        Self {
            url: url.into(),
            queues,
            client: Mutex::new(None),
        }
    }

    async fn open(&self) -> Result<RabbitMqClient, DispatchError> {
        let client = RabbitMqClient::connect(&self.url, 0).await?;
        client.enable_confirms().await?;
        for queue in &self.queues {
            client.declare_queue(queue).await?;
        }
        Ok(client)
    }
}

#[async_trait]
impl QueuePublisher for RabbitMqPublisher {
    async fn declare_queue(&self, queue: &str) -> Result<(), DispatchError> {
        let mut guard = self.client.lock().await;

        if !guard.as_ref().is_some_and(RabbitMqClient::is_connected) {
            *guard = Some(self.open().await?);
        }

        match guard.as_ref() {
            Some(client) => client.declare_queue(queue).await,
            None => Err(DispatchError::Connection("publisher not connected".to_string())),
        }
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        correlation_id: &str,
    ) -> Result<(), DispatchError> {
        let mut guard = self.client.lock().await;

        if !guard.as_ref().is_some_and(RabbitMqClient::is_connected) {
            if guard.is_some() {
                warn!("Publisher connection lost, reconnecting");
            }
            *guard = Some(self.open().await?);
        }

        let Some(client) = guard.as_ref() else {
            return Err(DispatchError::Connection("publisher not connected".to_string()));
        };

        if let Err(e) = client.publish(queue, payload, correlation_id).await {
            *guard = None;
            return Err(e);
        }

        debug!(queue, correlation_id, "Message published");
        Ok(())
    }
}
