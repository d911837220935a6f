//! Webhook dispatch - one HTTP POST per call.
//!
//! The dispatcher never retries. It classifies the single attempt and leaves
//! all orchestration to the retry loop.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client};
use tracing::{error, info, warn};
use url::Url;

use crate::error::DispatchError;
use crate::queue::Payload;

/// Default total timeout for one webhook request.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one dispatch attempt.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The webhook answered with a 2xx status.
    Success,
    /// Waiting may help: transport failure or non-2xx status.
    Retryable(DispatchError),
    /// The payload can never be delivered as-is.
    Fatal(DispatchError),
}

impl From<DispatchError> for DispatchOutcome {
    fn from(err: DispatchError) -> Self {
        if err.is_retryable() {
            DispatchOutcome::Retryable(err)
        } else {
            DispatchOutcome::Fatal(err)
        }
    }
}

/// Forwards a decoded payload to its downstream.
#[async_trait]
pub trait Dispatch<P: Payload>: Send + Sync {
    async fn dispatch(&self, payload: &P) -> DispatchOutcome;
}

/// Dispatcher that POSTs JSON to a fixed webhook URL.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    webhook_url: Url,
}

impl HttpDispatcher {
    /// Create a dispatcher with its own client and a total request timeout.
    pub fn new(webhook_url: Url, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DispatchError::Request)?;

        Ok(Self {
            client,
            webhook_url,
        })
    }

    async fn send(&self, body: Vec<u8>) -> Result<reqwest::StatusCode, DispatchError> {
        let response = self
            .client
            .post(self.webhook_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    DispatchError::Request(e)
                } else {
                    DispatchError::Transport(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status)
        } else {
            Err(DispatchError::Status(status))
        }
    }
}

#[async_trait]
impl<P: Payload> Dispatch<P> for HttpDispatcher {
    async fn dispatch(&self, payload: &P) -> DispatchOutcome {
        let label = payload.label();

        info!(
            label = %label,
            url = %self.webhook_url,
            "dispatch_starting"
        );

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                error!(label = %label, error = %e, "dispatch_serialize_failed");
                return DispatchOutcome::Fatal(DispatchError::Serialize(e));
            }
        };

        match self.send(body).await {
            Ok(status) => {
                info!(
                    label = %label,
                    status_code = status.as_u16(),
                    "dispatch_complete"
                );
                DispatchOutcome::Success
            }
            Err(e) => {
                match &e {
                    DispatchError::Transport(inner) if inner.is_timeout() => {
                        warn!(label = %label, error = %e, "dispatch_timeout");
                    }
                    DispatchError::Status(status) => {
                        warn!(
                            label = %label,
                            status_code = status.as_u16(),
                            "dispatch_rejected"
                        );
                    }
                    _ => {
                        warn!(label = %label, error = %e, "dispatch_failed");
                    }
                }
                e.into()
            }
        }
    }
}
