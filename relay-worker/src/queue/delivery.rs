//! Inbound deliveries and their one-shot acknowledgment handle.

use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
};

use crate::error::BrokerError;

/// Broker-side settlement of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// `basic.ack`: remove the message permanently.
    Ack,
    /// `basic.nack` with `requeue = true`: make the message available again.
    Requeue,
    /// `basic.reject` with `requeue = false`: drop or dead-letter the message.
    DeadLetter,
}

/// Acknowledgment channel back to the broker for one delivery.
#[async_trait]
pub trait Acknowledge: Send + Sync + 'static {
    async fn acknowledge(&self) -> Result<(), BrokerError>;

    async fn requeue(&self) -> Result<(), BrokerError>;

    async fn dead_letter(&self) -> Result<(), BrokerError>;
}

#[async_trait]
impl Acknowledge for Acker {
    async fn acknowledge(&self) -> Result<(), BrokerError> {
        self.ack(BasicAckOptions::default())
            .await
            .map_err(BrokerError::Settle)
    }

    async fn requeue(&self) -> Result<(), BrokerError> {
        self.nack(BasicNackOptions {
            multiple: false,
            requeue: true,
        })
        .await
        .map_err(BrokerError::Settle)
    }

    async fn dead_letter(&self) -> Result<(), BrokerError> {
        self.reject(BasicRejectOptions { requeue: false })
            .await
            .map_err(BrokerError::Settle)
    }
}

/// One message handed to a consumer.
///
/// The body is immutable and the acknowledgment handle is private:
/// the only way to reach the broker is `settle`, which consumes the delivery.
pub struct Delivery<A> {
    pub delivery_tag: u64,
    pub message_id: Option<String>,
    pub redelivered: bool,
    data: Vec<u8>,
    acker: A,
}

impl<A: Acknowledge> Delivery<A> {
    pub fn new(delivery_tag: u64, data: Vec<u8>, acker: A) -> Self {
        Self {
            delivery_tag,
            message_id: None,
            redelivered: false,
            data,
            acker,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Message id for logging, `"unknown"` when the producer set none.
    pub fn log_id(&self) -> &str {
        self.message_id.as_deref().unwrap_or("unknown")
    }

    /// Send the terminal decision to the broker.
    pub async fn settle(self, settlement: Settlement) -> Result<(), BrokerError> {
        match settlement {
            Settlement::Ack => self.acker.acknowledge().await,
            Settlement::Requeue => self.acker.requeue().await,
            Settlement::DeadLetter => self.acker.dead_letter().await,
        }
    }
}

impl From<lapin::message::Delivery> for Delivery<Acker> {
    fn from(delivery: lapin::message::Delivery) -> Self {
        let message_id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|s| s.to_string());

        Self {
            delivery_tag: delivery.delivery_tag,
            message_id,
            redelivered: delivery.redelivered,
            data: delivery.data,
            acker: delivery.acker,
        }
    }
}
