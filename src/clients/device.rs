use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use crate::models::device::DeviceRecord;

/// Registered terminals and the services each has enabled.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn find_device(
        &self,
        merchant_id: &str,
        terminal_id: &str,
    ) -> Result<Option<DeviceRecord>>;

    async fn health_check(&self) -> Result<()>;
}

/// Device directory backed by the `devices` table. The lock only guards
/// (re)connecting; queries run on a shared handle and pipeline over the
/// one connection.
pub struct PostgresDeviceDirectory {
    database_url: String,
    client: Mutex<Option<Arc<Client>>>,
}

impl PostgresDeviceDirectory {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            client: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Client, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(&self.database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");
        Ok(client)
    }

    async fn client(&self) -> Result<Arc<Client>, Error> {
        let mut guard = self.client.lock().await;

        match guard.as_ref() {
            Some(client) if !client.is_closed() => Ok(Arc::clone(client)),
            _ => {
                let client = Arc::new(self.connect().await?);
                *guard = Some(Arc::clone(&client));
                Ok(client)
            }
        }
    }
}

#[async_trait]
impl DeviceDirectory for PostgresDeviceDirectory {
    async fn find_device(
        &self,
        merchant_id: &str,
        terminal_id: &str,
    ) -> Result<Option<DeviceRecord>> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                "SELECT machine_identifier, enabled_services FROM devices \
                 WHERE merchant_id = $1 AND terminal_id = $2",
                &[&merchant_id, &terminal_id],
            )
            .await
            .map_err(|e| anyhow!("Device lookup failed: {}", e))?;

        let Some(row) = row else {
            debug!(merchant_id, terminal_id, "No device registered");
            return Ok(None);
        };

        Ok(Some(DeviceRecord {
            merchant_id: merchant_id.to_string(),
            terminal_id: terminal_id.to_string(),
            machine_identifier: row
                .try_get("machine_identifier")
                .map_err(|e| anyhow!("Invalid machine_identifier column: {}", e))?,
            enabled_services: row
                .try_get("enabled_services")
                .map_err(|e| anyhow!("Invalid enabled_services column: {}", e))?,
        }))
    }

    async fn health_check(&self) -> Result<()> {
        let client = self.client().await?;

        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}
