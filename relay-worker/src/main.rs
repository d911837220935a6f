//! Tentacloid relay - drains registration queues into their webhooks.
//!
//! Messages are acknowledged only after the webhook accepts them, retried
//! while the webhook is unavailable and requeued on shutdown.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tentacloid::{AppEnv, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;

    init_logging(config.app_env);

    tracing::info!("relay_starting");
    tracing::info!(
        app_env = ?config.app_env,
        rabbitmq_url_length = config.rabbitmq_url.len(),
        woc_queue = %config.woc.queue_name,
        aiverse_queue = %config.aiverse.queue_name,
        dispatch_timeout_ms = config.dispatch_timeout.as_millis() as u64,
        retry_strategy = ?config.retry.strategy,
        retry_delay_ms = config.retry.base_delay.as_millis() as u64,
        retry_max_attempts = ?config.retry.max_attempts,
        reconnect_delay_ms = config.reconnect_delay.as_millis() as u64,
        "config_loaded"
    );

    tentacloid::relay::run(config).await?;

    Ok(())
}

/// Structured JSON logs in production, human-readable logs in development.
fn init_logging(app_env: AppEnv) {
    let default_level = match app_env {
        AppEnv::Development => "debug",
        AppEnv::Production => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);

    match app_env {
        AppEnv::Production => registry
            .with(fmt::layer().json().flatten_event(true))
            .init(),
        AppEnv::Development => registry.with(fmt::layer().pretty()).init(),
    }
}
