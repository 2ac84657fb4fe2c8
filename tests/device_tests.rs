use std::time::Duration;

use anyhow::{Result, anyhow};
use futures_util::future::join_all;
use notification_dispatcher::{
    clients::device::{DeviceDirectory, PostgresDeviceDirectory},
    models::channel::Channel,
};
use testcontainers::{
    ContainerAsync, GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};
use tokio::time::sleep;
use tokio_postgres::NoTls;

async fn postgres() -> Result<(ContainerAsync<GenericImage>, String)> {
    let container = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .start()
        .await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;

    Ok((
        container,
        format!("postgres://postgres:postgres@{}:{}/postgres", host, port),
    ))
}

/// The image restarts once after init, so the first attempts may be refused.
async fn seed(url: &str) -> Result<()> {
    for _ in 0..20 {
        let Ok((client, connection)) = tokio_postgres::connect(url, NoTls).await else {
            sleep(Duration::from_millis(500)).await;
            continue;
        };
        tokio::spawn(connection);

        client
            .batch_execute(
                "CREATE TABLE devices (
                     merchant_id TEXT NOT NULL,
                     terminal_id TEXT NOT NULL,
                     machine_identifier TEXT NOT NULL,
                     enabled_services TEXT[] NOT NULL,
                     PRIMARY KEY (merchant_id, terminal_id)
                 );
                 INSERT INTO devices VALUES
                     ('M1', 'T1', 'MID-1', ARRAY['IPN', 'SMS']),
                     ('M2', 'T9', 'MID-9', ARRAY['EMAIL', 'FAX']);",
            )
            .await?;
        return Ok(());
    }

    Err(anyhow!("postgres never accepted connections"))
}

/// Test: Concurrent lookups and health checks share one connection
#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_lookups_share_connection() -> Result<()> {
    let (_container, url) = postgres().await?;
    seed(&url).await?;

    let directory = PostgresDeviceDirectory::new(&url);

    let lookups = join_all((0..8).map(|i| {
        let directory = &directory;
        async move {
            if i % 2 == 0 {
                directory.find_device("M1", "T1").await
            } else {
                directory.find_device("M2", "T9").await
            }
        }
    }));
    let (results, health) = tokio::join!(lookups, directory.health_check());

    health?;
    for (i, result) in results.into_iter().enumerate() {
        let device = result?.ok_or_else(|| anyhow!("device {} missing", i))?;
        if i % 2 == 0 {
            assert_eq!(device.machine_identifier, "MID-1");
            assert_eq!(device.enabled_channels(), vec![Channel::Forward, Channel::Sms]);
        } else {
            assert_eq!(device.machine_identifier, "MID-9");
            assert_eq!(device.enabled_channels(), vec![Channel::Email]);
        }
    }

    assert!(directory.find_device("M1", "T404").await?.is_none());

    Ok(())
}
