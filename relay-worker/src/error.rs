//! Error types for the relay.
//!
//! Startup errors (`ConfigError`, initial `BrokerError`) are fatal to the
//! process. Per-message errors (`DispatchError`) never leave the retry loop.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("setting {name} is not a valid absolute URL: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("setting {name} uses unsupported scheme '{scheme}'")]
    UnsupportedScheme { name: &'static str, scheme: String },

    #[error("setting {name} has invalid value '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

/// Errors raised by the broker connection and consumer registration.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    #[error("failed to open channel: {0}")]
    Channel(#[source] lapin::Error),

    #[error("broker connection is not available")]
    NotConnected,

    #[error("failed to declare queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to set prefetch on queue {queue}: {source}")]
    Qos {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to register consumer on queue {queue}: {source}")]
    Consume {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    #[error("failed to settle delivery: {0}")]
    Settle(#[source] lapin::Error),

    #[error("failed to close broker connection: {0}")]
    Close(#[source] lapin::Error),
}

/// Errors raised by a single webhook dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to build webhook request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("webhook unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("webhook responded with status {0}")]
    Status(StatusCode),
}

impl DispatchError {
    /// Whether waiting and trying again can change the result.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transport(_) | DispatchError::Status(_))
    }
}
