//! Queue module for RabbitMQ message types.
//!
//! This module provides:
//! - Queue names and declaration options
//! - Typed payloads for each downstream
//! - The `Delivery` wrapper whose acknowledgment handle can be used once
//!
//! ## Architecture
//!
//! ```text
//! Producers → durable queue → QueueConsumer → DispatchRetryLoop → webhook
//! ```

pub mod delivery;
pub mod types;

pub use delivery::{Acknowledge, Delivery, Settlement};
pub use types::{
    HackathonPayload, HackathonTeamMember, Payload, QueueBinding, WocPayload, HACKATHON_QUEUE,
    WOC_QUEUE,
};
