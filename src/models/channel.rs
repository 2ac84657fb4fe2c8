use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Serialize};

/// One of the independent delivery paths. Each has its own queue and consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Forward,
    Email,
    Sms,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Forward, Channel::Email, Channel::Sms];

    /// Maps a device directory service name (`IPN`, `EMAIL`, `SMS`).
    pub fn from_service(service: &str) -> Option<Self> {
        match service.trim().to_ascii_uppercase().as_str() {
            "IPN" => Some(Channel::Forward),
            "EMAIL" => Some(Channel::Email),
            "SMS" => Some(Channel::Sms),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Forward => "forward",
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a flush does with a message whose processor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Negative-acknowledge with requeue so the broker redelivers it.
    Requeue,
    /// Log and acknowledge anyway (best effort).
    Acknowledge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Consuming,
    Flushing,
    Stopped,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Flushing => "flushing",
            ConsumerState::Stopped => "stopped",
        }
    }
}

impl Display for ConsumerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}
