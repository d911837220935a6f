//! Tentacloid - RabbitMQ to webhook relay for registration events.
//!
//! Each durable queue is drained by its own consumer task. Every delivery is
//! decoded, POSTed to the queue's webhook and settled exactly once:
//! acknowledged on success or permanent failure, requeued on shutdown.
//!
//! ## Architecture
//!
//! ```text
//! Broker → QueueConsumer (per queue) → DispatchRetryLoop (per delivery) → Dispatcher → webhook
//!    ↑ reconnection watch                      ↑ ShutdownCoordinator cancels everything
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod dispatch_loop;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod relay;
pub mod retry;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use broker::{Broker, BrokerStatus, ConnectionState};
pub use config::{AppEnv, Config, Downstream};
pub use consumer::{DeliverySource, ListenExit, QueueConsumer};
pub use dispatch_loop::{AckReason, DispatchRetryLoop, Disposition};
pub use dispatcher::{Dispatch, DispatchOutcome, HttpDispatcher};
pub use error::{BrokerError, ConfigError, DispatchError};
pub use queue::{
    Delivery, HackathonPayload, Payload, QueueBinding, Settlement, WocPayload, HACKATHON_QUEUE,
    WOC_QUEUE,
};
pub use retry::RetryPolicy;
pub use shutdown::ShutdownCoordinator;
