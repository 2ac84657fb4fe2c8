//! In-memory collaborators for tests and single-process runs.
//!
//! [`InMemoryBroker`] mimics the parts of AMQP the dispatcher relies on:
//! per-session delivery tags, manual acknowledgement, requeue of unacked
//! deliveries when a connection dies, and idempotent queue declaration. It also
//! exposes failure switches so connection loss and broker outages can be
//! driven from tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::debug;

use crate::{
    clients::{device::DeviceDirectory, redis::NotificationHistory},
    dispatch::broker::{Acknowledger, Broker, ConsumerSession, Delivery, QueuePublisher},
    error::DispatchError,
    models::{device::DeviceRecord, ipn::IpnResponse, message::NotificationMessage},
    processors::{IpnForwarder, MailSender, SmsSender},
};

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    correlation_id: Option<String>,
    redelivered: bool,
}

struct SessionState {
    queue: String,
    alive: bool,
    next_tag: u64,
    unacked: BTreeMap<u64, StoredMessage>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    declarations: HashMap<String, usize>,
    sessions: HashMap<u64, SessionState>,
    sessions_opened: HashMap<String, usize>,
    next_session_id: u64,
    acked: HashMap<String, usize>,
    rejected: HashMap<String, usize>,
    failing_connects: usize,
    publish_unavailable: bool,
    unrecoverable: HashSet<String>,
}

impl BrokerState {
    fn declare(&mut self, queue: &str) {
        self.queues.entry(queue.to_string()).or_default();
        *self.declarations.entry(queue.to_string()).or_default() += 1;
    }
}

#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            changes: Arc::new(changes),
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// The next `count` calls to `open_session` fail with a connection error.
    pub async fn fail_next_connects(&self, count: usize) {
        self.state.lock().await.failing_connects = count;
    }

    pub async fn set_publish_unavailable(&self, unavailable: bool) {
        self.state.lock().await.publish_unavailable = unavailable;
    }

    /// Sessions for `queue` can no longer be opened at all.
    pub async fn mark_unrecoverable(&self, queue: &str) {
        self.state.lock().await.unrecoverable.insert(queue.to_string());
    }

    /// Drops every open connection. Unacked deliveries go back to the head of
    /// their queue flagged as redelivered, and every outstanding delivery tag
    /// becomes invalid.
    pub async fn sever_connections(&self) {
        let mut state = self.state.lock().await;
        let mut returned: Vec<(String, Vec<StoredMessage>)> = Vec::new();

        for session in state.sessions.values_mut().filter(|s| s.alive) {
            session.alive = false;
            let unacked = std::mem::take(&mut session.unacked);
            returned.push((
                session.queue.clone(),
                unacked
                    .into_values()
                    .map(|mut message| {
                        message.redelivered = true;
                        message
                    })
                    .collect(),
            ));
        }

        for (queue, messages) in returned {
            let ready = state.queues.entry(queue).or_default();
            for message in messages.into_iter().rev() {
                ready.push_front(message);
            }
        }

        debug!("In-memory broker severed all connections");
        drop(state);
        self.notify();
    }

    pub async fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub async fn unacked_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.alive && s.queue == queue)
            .map(|s| s.unacked.len())
            .sum()
    }

    pub async fn acked_count(&self, queue: &str) -> usize {
        self.state.lock().await.acked.get(queue).copied().unwrap_or(0)
    }

    pub async fn rejected_count(&self, queue: &str) -> usize {
        self.state.lock().await.rejected.get(queue).copied().unwrap_or(0)
    }

    pub async fn declarations(&self, queue: &str) -> usize {
        self.state.lock().await.declarations.get(queue).copied().unwrap_or(0)
    }

    pub async fn sessions_opened(&self, queue: &str) -> usize {
        self.state.lock().await.sessions_opened.get(queue).copied().unwrap_or(0)
    }

    /// Payloads waiting in `queue`, head first.
    pub async fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|ready| ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    async fn next_delivery(
        state: &Mutex<BrokerState>,
        session_id: u64,
        changes: &mut watch::Receiver<u64>,
    ) -> Option<Delivery> {
        loop {
            changes.borrow_and_update();

            {
                let mut guard = state.lock().await;
                let state = &mut *guard;
                let session = state.sessions.get_mut(&session_id)?;
                if !session.alive {
                    return None;
                }

                if let Some(message) = state
                    .queues
                    .get_mut(&session.queue)
                    .and_then(VecDeque::pop_front)
                {
                    session.next_tag += 1;
                    let delivery_tag = session.next_tag;
                    let delivery = Delivery {
                        delivery_tag,
                        correlation_id: message.correlation_id.clone(),
                        redelivered: message.redelivered,
                        payload: message.payload.clone(),
                    };
                    session.unacked.insert(delivery_tag, message);
                    return Some(delivery);
                }
            }

            if changes.changed().await.is_err() {
                return None;
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn open_session(&self, queue: &str) -> Result<ConsumerSession, DispatchError> {
        let session_id = {
            let mut state = self.state.lock().await;

            if state.unrecoverable.contains(queue) {
                return Err(DispatchError::Unrecoverable(format!(
                    "access to {} refused",
                    queue
                )));
            }
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(DispatchError::Connection("connection refused".to_string()));
            }

            state.declare(queue);
            *state.sessions_opened.entry(queue.to_string()).or_default() += 1;

            state.next_session_id += 1;
            let session_id = state.next_session_id;
            state.sessions.insert(
                session_id,
                SessionState {
                    queue: queue.to_string(),
                    alive: true,
                    next_tag: 0,
                    unacked: BTreeMap::new(),
                },
            );
            session_id
        };

        let deliveries = stream::unfold(
            (Arc::clone(&self.state), self.changes.subscribe()),
            move |(state, mut changes)| async move {
                let delivery = Self::next_delivery(&state, session_id, &mut changes).await?;
                Some((Ok::<_, DispatchError>(delivery), (state, changes)))
            },
        )
        .boxed();

        Ok(ConsumerSession {
            acknowledger: Arc::new(InMemoryChannel {
                state: Arc::clone(&self.state),
                changes: Arc::clone(&self.changes),
                session_id,
            }),
            deliveries,
        })
    }
}

#[async_trait]
impl QueuePublisher for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        if state.publish_unavailable {
            return Err(DispatchError::Connection("broker unreachable".to_string()));
        }
        state.declare(queue);
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        correlation_id: &str,
    ) -> Result<(), DispatchError> {
        {
            let mut state = self.state.lock().await;
            if state.publish_unavailable {
                return Err(DispatchError::Publish {
                    queue: queue.to_string(),
                    reason: "broker unreachable".to_string(),
                });
            }

            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(StoredMessage {
                    payload: payload.to_vec(),
                    correlation_id: Some(correlation_id.to_string()),
                    redelivered: false,
                });
        }

        self.notify();
        Ok(())
    }
}

/// Acknowledger bound to one session; tags from other sessions are unknown.
struct InMemoryChannel {
    state: Arc<Mutex<BrokerState>>,
    changes: Arc<watch::Sender<u64>>,
    session_id: u64,
}

impl InMemoryChannel {
    async fn settle(&self, delivery_tag: u64, outcome: Settle) -> Result<(), DispatchError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let session = state
            .sessions
            .get_mut(&self.session_id)
            .filter(|s| s.alive)
            .ok_or_else(|| DispatchError::Channel("channel closed".to_string()))?;

        let mut message = session.unacked.remove(&delivery_tag).ok_or_else(|| {
            DispatchError::Channel(format!("unknown delivery tag {}", delivery_tag))
        })?;
        let queue = session.queue.clone();

        match outcome {
            Settle::Ack => *state.acked.entry(queue).or_default() += 1,
            Settle::Requeue => {
                message.redelivered = true;
                state.queues.entry(queue).or_default().push_front(message);
                drop(guard);
                self.changes.send_modify(|version| *version += 1);
            }
            Settle::Drop => *state.rejected.entry(queue).or_default() += 1,
        }

        Ok(())
    }
}

enum Settle {
    Ack,
    Requeue,
    Drop,
}

#[async_trait]
impl Acknowledger for InMemoryChannel {
    async fn ack(&self, delivery_tag: u64) -> Result<(), DispatchError> {
        self.settle(delivery_tag, Settle::Ack).await
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), DispatchError> {
        let outcome = if requeue { Settle::Requeue } else { Settle::Drop };
        self.settle(delivery_tag, outcome).await
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), DispatchError> {
        self.settle(delivery_tag, Settle::Drop).await
    }
}

#[derive(Default)]
pub struct InMemoryDeviceDirectory {
    devices: RwLock<HashMap<(String, String), DeviceRecord>>,
    unavailable: RwLock<bool>,
}

impl InMemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, device: DeviceRecord) {
        self.devices.write().await.insert(
            (device.merchant_id.clone(), device.terminal_id.clone()),
            device,
        );
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write().await = unavailable;
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceDirectory {
    async fn find_device(
        &self,
        merchant_id: &str,
        terminal_id: &str,
    ) -> Result<Option<DeviceRecord>> {
        if *self.unavailable.read().await {
            return Err(anyhow!("Device directory unreachable"));
        }

        Ok(self
            .devices
            .read()
            .await
            .get(&(merchant_id.to_string(), terminal_id.to_string()))
            .cloned())
    }

    async fn health_check(&self) -> Result<()> {
        if *self.unavailable.read().await {
            return Err(anyhow!("Device directory unreachable"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHistory {
    entries: Mutex<HashMap<(String, String), VecDeque<NotificationMessage>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationHistory for InMemoryHistory {
    async fn record(&self, notification: &NotificationMessage, limit: usize) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let list = entries
            .entry((
                notification.merchant_id.clone(),
                notification.terminal_id.clone(),
            ))
            .or_default();

        list.push_front(notification.clone());
        list.truncate(limit);
        Ok(())
    }

    async fn recent(
        &self,
        merchant_id: &str,
        terminal_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationMessage>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&(merchant_id.to_string(), terminal_id.to_string()))
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// A sent email, SMS or IPN forward as seen by [`InMemoryOutbox`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Ipn {
        amount: String,
        machine_identifier: String,
    },
    Email {
        subject: String,
        body: String,
        recipient: String,
    },
    Sms {
        body: String,
        recipient: String,
    },
}

/// Records every outbound call instead of making it. Recipients listed in
/// `failing` are refused.
#[derive(Default)]
pub struct InMemoryOutbox {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: RwLock<HashSet<String>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails sends to `recipient` (email address, mobile number or machine
    /// identifier) until cleared.
    pub async fn fail_for(&self, recipient: &str) {
        self.failing.write().await.insert(recipient.to_string());
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    async fn deliver(&self, recipient: &str, message: OutboundMessage) -> Result<()> {
        if self.failing.read().await.contains(recipient) {
            return Err(anyhow!("Delivery to {} refused", recipient));
        }
        self.sent.lock().await.push(message);
        Ok(())
    }
}

#[async_trait]
impl IpnForwarder for InMemoryOutbox {
    async fn forward(&self, amount: &str, machine_identifier: &str) -> Result<IpnResponse> {
        self.deliver(
            machine_identifier,
            OutboundMessage::Ipn {
                amount: amount.to_string(),
                machine_identifier: machine_identifier.to_string(),
            },
        )
        .await?;

        Ok(IpnResponse {
            message: "Success".to_string(),
            response_code: serde_json::Value::from(0),
        })
    }
}

#[async_trait]
impl MailSender for InMemoryOutbox {
    async fn send_email(&self, subject: &str, body: &str, recipient: &str) -> Result<()> {
        self.deliver(
            recipient,
            OutboundMessage::Email {
                subject: subject.to_string(),
                body: body.to_string(),
                recipient: recipient.to_string(),
            },
        )
        .await
    }
}

#[async_trait]
impl SmsSender for InMemoryOutbox {
    async fn send_sms(&self, body: &str, recipient: &str) -> Result<()> {
        self.deliver(
            recipient,
            OutboundMessage::Sms {
                body: body.to_string(),
                recipient: recipient.to_string(),
            },
        )
        .await
    }
}
