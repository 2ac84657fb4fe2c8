use serde::{Deserialize, Serialize};

use crate::models::channel::Channel;

/// A terminal registered in the device directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub merchant_id: String,
    pub terminal_id: String,
    pub machine_identifier: String,
    pub enabled_services: Vec<String>,
}

impl DeviceRecord {
    /// Enabled channels in a stable order; unknown service names are skipped.
    pub fn enabled_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .enabled_services
            .iter()
            .filter_map(|service| Channel::from_service(service))
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }
}
