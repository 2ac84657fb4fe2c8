use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Otp,
    Alert,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_mobile_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_srl_no: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
}

/// A payment notification as posted by the acquirer.
///
/// Amounts stay in their decimal string form. Validation only admits the
/// plain decimal grammar of [`parse_amount`](crate::models::validation::parse_amount),
/// so the number forwarded downstream has the same digits the acquirer sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub amount: String,
    pub mobile_number: String,
    pub merchant_id: String,
    pub terminal_id: String,
    pub retrieval_reference_number: String,
    pub remark1: String,
    pub unique_id: String,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<NotificationType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

impl NotificationMessage {
    pub fn email(&self) -> Option<&str> {
        self.properties.as_ref()?.email.as_deref()
    }

    pub fn commission(&self) -> Option<&str> {
        self.properties.as_ref()?.commission.as_deref()
    }
}

/// Queue payload: the notification plus the routing data the forward
/// channel needs from the device directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedNotification {
    #[serde(flatten)]
    pub notification: NotificationMessage,

    #[serde(
        default,
        rename = "machineIdentifier",
        skip_serializing_if = "Option::is_none"
    )]
    pub machine_identifier: Option<String>,
}

impl QueuedNotification {
    pub fn new(notification: NotificationMessage, machine_identifier: Option<String>) -> Self {
        Self {
            notification,
            machine_identifier,
        }
    }
}

/// A decoded delivery, tied to the broker channel it arrived on.
#[derive(Debug, Clone)]
pub struct ChannelEnvelope {
    pub delivery_tag: u64,
    pub correlation_id: String,
    pub message: QueuedNotification,
}
