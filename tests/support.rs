use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use notification_dispatcher::{
    dispatch::Acknowledger,
    error::{DispatchError, ProcessingError},
    models::message::{
        ChannelEnvelope, NotificationMessage, NotificationType, Properties, QueuedNotification,
    },
    processors::Processor,
};
use tokio::{sync::Mutex, time::sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack(u64),
    Nack { tag: u64, requeue: bool },
    Reject(u64),
}

/// Acknowledger that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingAcknowledger {
    settlements: Mutex<Vec<Settlement>>,
    fail: AtomicBool,
}

impl RecordingAcknowledger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub async fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().await.clone()
    }

    async fn record(&self, settlement: Settlement) -> Result<(), DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Channel("channel closed".to_string()));
        }
        self.settlements.lock().await.push(settlement);
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for RecordingAcknowledger {
    async fn ack(&self, delivery_tag: u64) -> Result<(), DispatchError> {
        self.record(Settlement::Ack(delivery_tag)).await
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), DispatchError> {
        self.record(Settlement::Nack {
            tag: delivery_tag,
            requeue,
        })
        .await
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), DispatchError> {
        self.record(Settlement::Reject(delivery_tag)).await
    }
}

/// Processor that records every message it sees, in order.
#[derive(Default)]
pub struct RecordingProcessor {
    seen: Mutex<Vec<String>>,
    received: Mutex<Vec<QueuedNotification>>,
    failures: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Fails the next `times` attempts for `unique_id`.
    pub async fn fail(&self, unique_id: &str, times: usize) {
        self.failures
            .lock()
            .await
            .insert(unique_id.to_string(), times);
    }

    pub async fn seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }

    pub async fn received(&self) -> Vec<QueuedNotification> {
        self.received.lock().await.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, message: &QueuedNotification) -> Result<(), ProcessingError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        let unique_id = message.notification.unique_id.clone();
        self.seen.lock().await.push(unique_id.clone());
        self.received.lock().await.push(message.clone());

        let should_fail = {
            let mut failures = self.failures.lock().await;
            match failures.get_mut(&unique_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if should_fail {
            Err(ProcessingError::Upstream(format!("{} refused", unique_id)))
        } else {
            Ok(())
        }
    }
}

pub fn notification(unique_id: &str) -> NotificationMessage {
    NotificationMessage {
        amount: "100.00".to_string(),
        mobile_number: "9841234567".to_string(),
        merchant_id: "M1".to_string(),
        terminal_id: "T1".to_string(),
        retrieval_reference_number: "R1".to_string(),
        remark1: "x".to_string(),
        unique_id: unique_id.to_string(),
        notification_type: Some(NotificationType::Alert),
        properties: Some(Properties {
            email: Some("a@b.com".to_string()),
            commission: Some("2.00".to_string()),
            ..Properties::default()
        }),
    }
}

pub fn queued(unique_id: &str) -> QueuedNotification {
    QueuedNotification::new(notification(unique_id), Some("MID-1".to_string()))
}

/// A queued notification with every optional field populated.
pub fn fully_populated(unique_id: &str) -> QueuedNotification {
    let mut notification = notification(unique_id);
    notification.notification_type = Some(NotificationType::Otp);
    notification.properties = Some(Properties {
        txn_date: Some("2024-03-01 14:05:09".to_string()),
        secondary_mobile_number: Some("9801234567".to_string()),
        email: Some("merchant@example.com".to_string()),
        session_srl_no: Some("S-0042".to_string()),
        commission: Some("2.50".to_string()),
        initiator: Some("pos-terminal".to_string()),
    });

    QueuedNotification::new(notification, Some("MID-7".to_string()))
}

pub fn queued_payload(unique_id: &str) -> Vec<u8> {
    serde_json::to_vec(&queued(unique_id)).expect("notification serializes")
}

pub fn envelope(delivery_tag: u64, unique_id: &str) -> ChannelEnvelope {
    ChannelEnvelope {
        delivery_tag,
        correlation_id: format!("corr-{}", delivery_tag),
        message: queued(unique_id),
    }
}

/// Polls `check` every 10ms of (possibly paused) time until it holds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..3_000 {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 30s");
}
