//! Per-delivery dispatch and retry state machine.
//!
//! ```text
//! Received ─decode─▶ Processing ─success──────────────▶ Acknowledged(success)
//!    │                  │  │ ─fatal───────────────────▶ Acknowledged(fatal)
//!    │                  │  └─retryable─▶ AwaitingBackoff ─delay─▶ Processing
//!    │                  │                   │  └─attempts exhausted─▶ DeadLettered
//!    └─decode error─▶ Acknowledged(undecodable)
//!
//! cancellation at any suspension point ─▶ Requeued
//! ```
//!
//! Every path ends in exactly one `Delivery::settle` call.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::dispatcher::{Dispatch, DispatchOutcome};
use crate::queue::{Acknowledge, Delivery, Payload, Settlement};
use crate::retry::RetryPolicy;
use crate::shutdown::until_cancelled;

/// Why a delivery was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReason {
    /// The webhook accepted the payload.
    Delivered,
    /// The body could not be decoded; waiting will not change that.
    Undecodable,
    /// The dispatcher reported a non-retryable failure.
    Fatal,
}

/// Terminal state of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledged(AckReason),
    /// Handed back to the broker because shutdown was requested.
    Requeued,
    /// A bounded retry policy ran out of attempts.
    DeadLettered,
}

impl Disposition {
    pub fn settlement(self) -> Settlement {
        match self {
            Disposition::Acknowledged(_) => Settlement::Ack,
            Disposition::Requeued => Settlement::Requeue,
            Disposition::DeadLettered => Settlement::DeadLetter,
        }
    }
}

/// Attempt bookkeeping for one delivery. Attempts are strictly sequential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based number of the attempt about to run or just finished.
    pub number: u32,
    pub last_failure: Option<String>,
}

impl RetryAttempt {
    fn first() -> Self {
        Self {
            number: 1,
            last_failure: None,
        }
    }

    fn next(self) -> Self {
        Self {
            number: self.number.saturating_add(1),
            last_failure: self.last_failure,
        }
    }
}

enum State<P> {
    Received,
    Processing { payload: P, attempt: RetryAttempt },
    AwaitingBackoff { payload: P, attempt: RetryAttempt },
    Done(Disposition),
}

/// Drives one delivery at a time from receipt to a terminal settlement.
pub struct DispatchRetryLoop<P, D> {
    queue: String,
    dispatcher: Arc<D>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    _payload: PhantomData<fn() -> P>,
}

impl<P, D> DispatchRetryLoop<P, D>
where
    P: Payload,
    D: Dispatch<P>,
{
    pub fn new(
        queue: impl Into<String>,
        dispatcher: Arc<D>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue: queue.into(),
            dispatcher,
            policy,
            cancel,
            _payload: PhantomData,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Process `delivery` to completion and settle it with the broker.
    ///
    /// A failed settlement is logged; the broker redelivers unsettled
    /// messages once the channel closes.
    pub async fn run<A: Acknowledge>(&self, delivery: Delivery<A>) -> Disposition {
        let mut state = State::Received;

        let disposition = loop {
            state = match state {
                State::Received => self.decode(&delivery),
                State::Processing { payload, attempt } => {
                    self.attempt(&delivery, payload, attempt).await
                }
                State::AwaitingBackoff { payload, attempt } => {
                    self.backoff(&delivery, payload, attempt).await
                }
                State::Done(disposition) => break disposition,
            };
        };

        let delivery_tag = delivery.delivery_tag;
        let message_id = delivery.log_id().to_string();

        match delivery.settle(disposition.settlement()).await {
            Ok(()) => info!(
                queue = %self.queue,
                message_id = %message_id,
                delivery_tag = delivery_tag,
                disposition = ?disposition,
                "rabbitmq_delivery_settled"
            ),
            Err(e) => error!(
                queue = %self.queue,
                message_id = %message_id,
                delivery_tag = delivery_tag,
                disposition = ?disposition,
                error = %e,
                "rabbitmq_settle_failed"
            ),
        }

        disposition
    }

    fn decode<A: Acknowledge>(&self, delivery: &Delivery<A>) -> State<P> {
        match serde_json::from_slice::<P>(delivery.data()) {
            Ok(payload) => State::Processing {
                payload,
                attempt: RetryAttempt::first(),
            },
            Err(e) => {
                // serde_json quotes offending values, so the message itself
                // is withheld for sensitive payloads. The body never is logged.
                let detail = if P::SENSITIVE {
                    None
                } else {
                    Some(e.to_string())
                };
                error!(
                    queue = %self.queue,
                    message_id = %delivery.log_id(),
                    delivery_tag = delivery.delivery_tag,
                    body_length = delivery.data().len(),
                    error_category = ?e.classify(),
                    error_line = e.line(),
                    error_column = e.column(),
                    error = ?detail,
                    "delivery_decode_failed"
                );
                State::Done(Disposition::Acknowledged(AckReason::Undecodable))
            }
        }
    }

    async fn attempt<A: Acknowledge>(
        &self,
        delivery: &Delivery<A>,
        payload: P,
        mut attempt: RetryAttempt,
    ) -> State<P> {
        if self.cancel.is_cancelled() {
            return self.requeue_for_shutdown(delivery, &attempt);
        }

        let outcome = match until_cancelled(&self.cancel, self.dispatcher.dispatch(&payload)).await
        {
            Some(outcome) => outcome,
            None => return self.requeue_for_shutdown(delivery, &attempt),
        };

        match outcome {
            // Success observed after shutdown started is still requeued.
            DispatchOutcome::Success if self.cancel.is_cancelled() => {
                self.requeue_for_shutdown(delivery, &attempt)
            }
            DispatchOutcome::Success => {
                info!(
                    queue = %self.queue,
                    message_id = %delivery.log_id(),
                    label = %payload.label(),
                    attempt = attempt.number,
                    "dispatch_delivered"
                );
                State::Done(Disposition::Acknowledged(AckReason::Delivered))
            }
            DispatchOutcome::Fatal(e) => {
                error!(
                    queue = %self.queue,
                    message_id = %delivery.log_id(),
                    label = %payload.label(),
                    attempt = attempt.number,
                    error = %e,
                    "dispatch_fatal"
                );
                State::Done(Disposition::Acknowledged(AckReason::Fatal))
            }
            DispatchOutcome::Retryable(e) => {
                attempt.last_failure = Some(e.to_string());

                if !self.policy.allows_another(attempt.number) {
                    error!(
                        queue = %self.queue,
                        message_id = %delivery.log_id(),
                        label = %payload.label(),
                        attempts = attempt.number,
                        error = %e,
                        "dispatch_attempts_exhausted"
                    );
                    return State::Done(Disposition::DeadLettered);
                }

                warn!(
                    queue = %self.queue,
                    message_id = %delivery.log_id(),
                    label = %payload.label(),
                    attempt = attempt.number,
                    error = %e,
                    "dispatch_retryable_failure"
                );
                State::AwaitingBackoff { payload, attempt }
            }
        }
    }

    async fn backoff<A: Acknowledge>(
        &self,
        delivery: &Delivery<A>,
        payload: P,
        attempt: RetryAttempt,
    ) -> State<P> {
        let delay = self.policy.delay_for(attempt.number);

        info!(
            queue = %self.queue,
            message_id = %delivery.log_id(),
            attempt = attempt.number,
            delay_ms = delay.as_millis() as u64,
            "dispatch_retry_scheduled"
        );

        match until_cancelled(&self.cancel, tokio::time::sleep(delay)).await {
            Some(()) => State::Processing {
                payload,
                attempt: attempt.next(),
            },
            None => self.requeue_for_shutdown(delivery, &attempt),
        }
    }

    fn requeue_for_shutdown<A: Acknowledge>(
        &self,
        delivery: &Delivery<A>,
        attempt: &RetryAttempt,
    ) -> State<P> {
        info!(
            queue = %self.queue,
            message_id = %delivery.log_id(),
            delivery_tag = delivery.delivery_tag,
            attempt = attempt.number,
            last_failure = ?attempt.last_failure,
            "delivery_requeued_for_shutdown"
        );
        State::Done(Disposition::Requeued)
    }
}
