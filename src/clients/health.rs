use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    clients::{device::DeviceDirectory, redis::NotificationHistory},
    dispatch::QueuePublisher,
    models::{
        channel::{Channel, ConsumerState},
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
};

pub struct HealthChecker {
    publisher: Arc<dyn QueuePublisher>,
    probe_queue: String,
    directory: Arc<dyn DeviceDirectory>,
    history: Arc<dyn NotificationHistory>,
    consumers: Vec<(Channel, watch::Receiver<ConsumerState>)>,
}

impl HealthChecker {
    pub fn new(
        publisher: Arc<dyn QueuePublisher>,
        probe_queue: impl Into<String>,
        directory: Arc<dyn DeviceDirectory>,
        history: Arc<dyn NotificationHistory>,
    ) -> Self {
        Self {
            publisher,
            probe_queue: probe_queue.into(),
            directory,
            history,
            consumers: Vec::new(),
        }
    }

    pub fn with_consumer(mut self, channel: Channel, state: watch::Receiver<ConsumerState>) -> Self {
        self.consumers.push((channel, state));
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("message_broker".to_string(), self.check_broker().await);
        checks.insert("device_directory".to_string(), self.check_directory().await);
        checks.insert("history_store".to_string(), self.check_history().await);

        for (channel, state) in &self.consumers {
            checks.insert(
                format!("{}_consumer", channel.as_str()),
                Self::check_consumer(*state.borrow()),
            );
        }

        let status = Self::determine_overall_status(&checks);

        HealthCheckResponse {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_broker(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.publisher.declare_queue(&self.probe_queue).await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Broker health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Broker health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    async fn check_directory(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.directory.health_check().await {
            Ok(()) => ServiceHealth::healthy(start.elapsed().as_millis() as u64),
            Err(e) => {
                warn!(error = %e, "Device directory health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    async fn check_history(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.history.health_check().await {
            Ok(()) => ServiceHealth::healthy(start.elapsed().as_millis() as u64),
            Err(e) => {
                warn!(error = %e, "History store health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    fn check_consumer(state: ConsumerState) -> ServiceHealth {
        let status = match state {
            ConsumerState::Consuming | ConsumerState::Flushing => HealthStatus::Healthy,
            ConsumerState::Connecting | ConsumerState::Disconnected => HealthStatus::Degraded,
            ConsumerState::Stopped => HealthStatus::Unhealthy,
        };

        ServiceHealth::consumer(status, state.as_str().to_string())
    }

    /// The broker is critical; everything else only degrades the service.
    fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let broker_down = checks
            .get("message_broker")
            .is_some_and(|health| health.status == HealthStatus::Unhealthy);

        let any_impaired = checks
            .values()
            .any(|health| health.status != HealthStatus::Healthy);

        if broker_down {
            HealthStatus::Unhealthy
        } else if any_impaired {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
