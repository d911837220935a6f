//! Process wiring: one broker connection, one consumer task per downstream.
//!
//! This function:
//! 1. Connects to RabbitMQ (failure is fatal)
//! 2. Starts the reconnection watch
//! 3. Spawns a supervised consumer per downstream queue
//! 4. Waits for SIGINT/SIGTERM or a fatal consumer error
//! 5. Closes the broker connection

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::broker::Broker;
use crate::config::{Config, Downstream};
use crate::consumer::QueueConsumer;
use crate::dispatch_loop::DispatchRetryLoop;
use crate::dispatcher::HttpDispatcher;
use crate::error::BrokerError;
use crate::queue::{HackathonPayload, Payload, WocPayload};
use crate::shutdown::ShutdownCoordinator;

/// Run the relay until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let shutdown = ShutdownCoordinator::new();
    shutdown.listen_for_signals();

    let broker = Broker::connect(&config.rabbitmq_url, config.reconnect_delay)
        .await
        .context("Failed to connect to RabbitMQ")?;

    let watcher = {
        let broker = broker.clone();
        let token = shutdown.token();
        tokio::spawn(async move { broker.watch_connection(token).await })
    };

    let mut consumers = JoinSet::new();
    spawn_downstream::<HackathonPayload>(
        &mut consumers,
        &broker,
        &config,
        &config.aiverse,
        &shutdown,
    )?;
    spawn_downstream::<WocPayload>(&mut consumers, &broker, &config, &config.woc, &shutdown)?;

    info!(consumers = consumers.len(), "relay_ready");

    let mut failure: Option<anyhow::Error> = None;
    while let Some(joined) = consumers.join_next().await {
        match joined {
            Ok((queue, Ok(()))) => info!(queue = %queue, "relay_consumer_stopped"),
            Ok((queue, Err(e))) => {
                error!(queue = %queue, error = %e, "relay_consumer_failed");
                shutdown.trigger();
                failure.get_or_insert_with(|| {
                    anyhow::Error::new(e).context(format!("Consumer for queue {} failed", queue))
                });
            }
            Err(e) => {
                error!(error = %e, "relay_consumer_panicked");
                shutdown.trigger();
                failure.get_or_insert_with(|| {
                    anyhow::Error::new(e).context("Consumer task panicked")
                });
            }
        }
    }

    shutdown.trigger();
    if let Err(e) = watcher.await {
        error!(error = %e, "rabbitmq_watch_panicked");
    }

    if let Err(e) = broker.close().await {
        error!(error = %e, "rabbitmq_close_failed");
    }

    info!("relay_shutdown_complete");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Build the dispatcher, retry loop and consumer for one downstream and spawn it.
fn spawn_downstream<P: Payload>(
    consumers: &mut JoinSet<(String, Result<(), BrokerError>)>,
    broker: &Broker,
    config: &Config,
    downstream: &Downstream,
    shutdown: &ShutdownCoordinator,
) -> Result<()> {
    let dispatcher = HttpDispatcher::new(downstream.webhook_url.clone(), config.dispatch_timeout)
        .context("Failed to create HTTP client")?;

    let retry_loop = DispatchRetryLoop::<P, _>::new(
        downstream.queue_name.clone(),
        Arc::new(dispatcher),
        config.retry.clone(),
        shutdown.token(),
    );
    let consumer = QueueConsumer::new(retry_loop);
    let broker = broker.clone();
    let queue = downstream.queue_name.clone();

    info!(
        queue = %queue,
        webhook_host = ?downstream.webhook_url.host_str(),
        "relay_consumer_starting"
    );

    consumers.spawn(async move {
        let result = consumer.supervise(&broker).await;
        (queue, result)
    });

    Ok(())
}
