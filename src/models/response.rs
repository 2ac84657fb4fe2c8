use serde::{Deserialize, Serialize};

use crate::models::{channel::Channel, message::NotificationMessage, validation::FieldError};

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
            errors: Vec::new(),
        }
    }

    pub fn error(error: String, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message,
            errors: Vec::new(),
        }
    }

    pub fn with_field_errors(mut self, errors: Vec<FieldError>) -> Self {
        self.errors = errors;
        self
    }
}

/// Acceptance receipt in the acquirer's response format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationResponse {
    pub status: bool,
    pub message: String,
    pub code: String,
    pub data: AcceptedNotification,
    pub http_status: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedNotification {
    pub mobile_number: String,
    pub msg_id: String,
    pub channels: Vec<Channel>,
}

impl SendNotificationResponse {
    pub fn accepted(mobile_number: String, msg_id: String, channels: Vec<Channel>) -> Self {
        Self {
            status: true,
            message: "Notification accepted".to_string(),
            code: "0".to_string(),
            data: AcceptedNotification {
                mobile_number,
                msg_id,
                channels,
            },
            http_status: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub merchant_id: String,
    pub terminal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub transaction_notification_details: Vec<NotificationMessage>,
}
