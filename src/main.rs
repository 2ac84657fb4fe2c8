use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_dispatcher::{
    api::{AppState, run_api_server},
    clients::{
        device::{DeviceDirectory, PostgresDeviceDirectory},
        health::HealthChecker,
        ipn::IpnClient,
        mail::EmailClient,
        rbmq::{RabbitMqBroker, RabbitMqPublisher},
        redis::{NotificationHistory, RedisHistory},
        sms::{SmsClient, SmsClientSettings},
    },
    config::Config,
    dispatch::{Broker, ChannelConsumer, ConnectionSupervisor, QueuePublisher},
    processors::{EmailProcessor, ForwardProcessor, ProcessorRegistry, SmsProcessor},
    utils::init_tracing,
};
use tokio::{signal, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let queues = config.channel_queues();
    let retry_config = config.retry_config();

    let registry = ProcessorRegistry::new(
        Arc::new(ForwardProcessor::new(Arc::new(IpnClient::new(
            &config.ipn_url,
            &config.ipn_subscription_key,
            retry_config.clone(),
        )?))),
        Arc::new(EmailProcessor::new(Arc::new(EmailClient::new(
            &config.smtp_host,
            config.smtp_port,
            &config.smtp_username,
            &config.smtp_password,
            &config.email_from,
        )?))),
        Arc::new(SmsProcessor::new(Arc::new(SmsClient::new(
            SmsClientSettings {
                base_url: config.sms_api_url.clone(),
                account_sid: config.sms_account_sid.clone(),
                auth_token: config.sms_auth_token.clone(),
                from: config.sms_from.clone(),
                country_code: config.sms_country_code.clone(),
            },
            retry_config,
        )?))),
    );

    let publisher: Arc<dyn QueuePublisher> =
        Arc::new(RabbitMqPublisher::new(&config.rabbitmq_url, queues.all()));
    let directory: Arc<dyn DeviceDirectory> =
        Arc::new(PostgresDeviceDirectory::new(&config.database_url));
    let history: Arc<dyn NotificationHistory> =
        Arc::new(RedisHistory::connect(&config.redis_url).await?);
    let broker: Arc<dyn Broker> = Arc::new(RabbitMqBroker::new(
        &config.rabbitmq_url,
        config.prefetch_count,
    ));

    let shutdown = CancellationToken::new();
    let mut health_checker = HealthChecker::new(
        Arc::clone(&publisher),
        queues.forward.clone(),
        Arc::clone(&directory),
        Arc::clone(&history),
    );
    let mut supervisors = JoinSet::new();

    for channel in config.enabled_channels()? {
        let consumer = Arc::new(ChannelConsumer::new(
            channel,
            queues.name(channel),
            registry.for_channel(channel),
            config.failure_policy(channel),
            config.batch_settings(),
        ));
        health_checker = health_checker.with_consumer(channel, consumer.subscribe_state());

        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&broker), consumer, config.reconnect_delay());
        let token = shutdown.clone();

        supervisors.spawn(async move {
            let result = supervisor.run(token).await;
            (channel, result)
        });
        info!(channel = %channel, "Channel supervisor started");
    }

    let state = Arc::new(AppState {
        credentials: config.credentials(),
        publisher,
        directory,
        history,
        queues,
        history_limit: config.history_limit,
        health_checker,
    });

    let api_shutdown = shutdown.clone();
    let api = tokio::spawn(run_api_server(state, config.server_port, async move {
        api_shutdown.cancelled().await
    }));

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
    shutdown.cancel();

    while let Some(joined) = supervisors.join_next().await {
        match joined {
            Ok((channel, Ok(()))) => info!(channel = %channel, "Channel supervisor finished"),
            Ok((channel, Err(e))) => {
                error!(channel = %channel, error = %e, "Channel supervisor failed")
            }
            Err(e) => error!(error = %e, "Channel supervisor task panicked"),
        }
    }

    match api.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Ingestion API stopped with error"),
        Err(e) => error!(error = %e, "Ingestion API task panicked"),
    }

    info!("Notification dispatcher stopped");
    Ok(())
}
