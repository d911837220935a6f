//! RabbitMQ consumer module using lapin.
//!
//! One `QueueConsumer` drains one durable queue. Deliveries are processed
//! strictly one at a time: the next delivery is not pulled until the current
//! one has been settled.
//!
//! When the delivery stream closes (channel or connection loss), `supervise`
//! waits for the broker to report a live connection and registers again on a
//! fresh channel. Only the first registration failure is returned. A delivery
//! still in its retry loop when the connection drops is abandoned; the broker
//! has already requeued it.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream::BoxStream, Stream, StreamExt};
use lapin::{
    acker::Acker,
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
};
use tracing::{error, info, warn};

use crate::broker::{Broker, BrokerStatus, ConnectionState};
use crate::dispatch_loop::DispatchRetryLoop;
use crate::dispatcher::Dispatch;
use crate::error::BrokerError;
use crate::queue::{Acknowledge, Delivery, Payload, QueueBinding};
use crate::shutdown::until_cancelled;

/// Prefetch per consumer channel; matches one-at-a-time processing.
const PREFETCH_COUNT: u16 = 1;

/// Why `drain` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenExit {
    /// The shutdown token fired.
    Cancelled,
    /// The broker closed the delivery stream, or the connection it was
    /// registered on went away.
    StreamClosed,
}

/// What `supervise` needs from the broker connection.
#[async_trait]
pub trait DeliverySource: Send + Sync {
    type Acker: Acknowledge;
    type Error: Display + Send;

    /// Generation of the current (or last live) connection.
    fn generation(&self) -> u64;

    fn reconnect_delay(&self) -> Duration;

    /// Resolves once a connection is live.
    async fn wait_connected(&self) -> BrokerStatus;

    /// Declare `binding`, register a manual-ack subscription on a fresh
    /// channel and return its deliveries.
    async fn register(
        &self,
        binding: &QueueBinding,
        generation: u64,
    ) -> Result<BoxStream<'static, Result<Delivery<Self::Acker>, Self::Error>>, BrokerError>;

    /// Resolves once the connection of `generation` is gone.
    async fn connection_lost(&self, generation: u64);
}

#[async_trait]
impl DeliverySource for Broker {
    type Acker = Acker;
    type Error = lapin::Error;

    fn generation(&self) -> u64 {
        Broker::generation(self)
    }

    fn reconnect_delay(&self) -> Duration {
        Broker::reconnect_delay(self)
    }

    async fn wait_connected(&self) -> BrokerStatus {
        Broker::wait_connected(self).await
    }

    async fn register(
        &self,
        binding: &QueueBinding,
        generation: u64,
    ) -> Result<BoxStream<'static, Result<Delivery<Acker>, lapin::Error>>, BrokerError> {
        let queue = &binding.name;
        let channel = self.channel().await?;

        channel
            .queue_declare(queue, binding.declare_options(), FieldTable::default())
            .await
            .map_err(|source| BrokerError::Declare {
                queue: queue.clone(),
                source,
            })?;

        info!(queue = %queue, "rabbitmq_queue_declared");

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(|source| BrokerError::Qos {
                queue: queue.clone(),
                source,
            })?;

        let consumer_tag = format!("{}-{}", queue, generation);
        let consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|source| BrokerError::Consume {
                queue: queue.clone(),
                source,
            })?;

        info!(
            queue = %queue,
            consumer_tag = %consumer_tag,
            generation = generation,
            "rabbitmq_consumer_started"
        );

        // The stream owns its channel.
        Ok(consumer
            .map(move |item| {
                let _channel = &channel;
                item.map(Delivery::<Acker>::from)
            })
            .boxed())
    }

    async fn connection_lost(&self, generation: u64) {
        let mut rx = self.subscribe();
        let _ = rx
            .wait_for(|status| {
                status.generation != generation || status.state != ConnectionState::Connected
            })
            .await;
    }
}

/// Consumer for one named durable queue.
pub struct QueueConsumer<P, D> {
    binding: QueueBinding,
    retry_loop: DispatchRetryLoop<P, D>,
}

impl<P, D> QueueConsumer<P, D>
where
    P: Payload,
    D: Dispatch<P>,
{
    pub fn new(retry_loop: DispatchRetryLoop<P, D>) -> Self {
        Self {
            binding: QueueBinding::new(retry_loop.queue()),
            retry_loop,
        }
    }

    /// Keep consuming across reconnections until shutdown.
    ///
    /// Returns an error only if the very first registration fails.
    pub async fn supervise<S: DeliverySource>(&self, source: &S) -> Result<(), BrokerError> {
        let cancel = self.retry_loop.cancel_token().clone();

        let mut registered_on = source.generation();
        let deliveries = source.register(&self.binding, registered_on).await?;
        let mut exit = self
            .drain(deliveries, source.connection_lost(registered_on))
            .await;

        loop {
            if exit == ListenExit::Cancelled {
                return Ok(());
            }

            warn!(
                queue = %self.binding.name,
                generation = registered_on,
                "rabbitmq_consumer_stream_closed"
            );

            // Give the reconnection watch a chance to notice the loss.
            if until_cancelled(&cancel, tokio::time::sleep(source.reconnect_delay()))
                .await
                .is_none()
            {
                return Ok(());
            }

            let Some(status) = until_cancelled(&cancel, source.wait_connected()).await else {
                return Ok(());
            };
            registered_on = status.generation;

            exit = match source.register(&self.binding, registered_on).await {
                Ok(deliveries) => {
                    self.drain(deliveries, source.connection_lost(registered_on))
                        .await
                }
                Err(e) => {
                    error!(
                        queue = %self.binding.name,
                        error = %e,
                        "rabbitmq_consumer_reregister_failed"
                    );
                    ListenExit::StreamClosed
                }
            };
        }
    }

    /// Feed deliveries from `stream` through the retry loop, one at a time.
    ///
    /// When `lost` resolves, the in-flight delivery is abandoned without
    /// settling: its channel is gone and the broker requeues it.
    pub async fn drain<S, A, E, L>(&self, stream: S, lost: L) -> ListenExit
    where
        S: Stream<Item = Result<Delivery<A>, E>>,
        A: Acknowledge,
        E: Display,
        L: Future<Output = ()>,
    {
        let queue = &self.binding.name;
        let cancel = self.retry_loop.cancel_token();
        let mut stream = std::pin::pin!(stream);
        let mut lost = std::pin::pin!(lost);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(queue = %queue, "rabbitmq_consumer_stopping");
                    return ListenExit::Cancelled;
                }
                _ = &mut lost => {
                    warn!(queue = %queue, "rabbitmq_consumer_connection_lost");
                    return ListenExit::StreamClosed;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let message_id = delivery.log_id().to_string();
                    let delivery_tag = delivery.delivery_tag;

                    info!(
                        queue = %queue,
                        message_id = %message_id,
                        delivery_tag = delivery_tag,
                        redelivered = delivery.redelivered,
                        body_length = delivery.data().len(),
                        "rabbitmq_delivery_received"
                    );

                    tokio::select! {
                        biased;
                        _ = self.retry_loop.run(delivery) => {}
                        _ = &mut lost => {
                            warn!(
                                queue = %queue,
                                message_id = %message_id,
                                delivery_tag = delivery_tag,
                                "rabbitmq_delivery_abandoned"
                            );
                            return ListenExit::StreamClosed;
                        }
                    }
                }
                Some(Err(e)) => {
                    error!(queue = %queue, error = %e, "rabbitmq_delivery_error");
                    return ListenExit::StreamClosed;
                }
                None => {
                    warn!(queue = %queue, "rabbitmq_consumer_closed");
                    return ListenExit::StreamClosed;
                }
            }
        }
    }
}
