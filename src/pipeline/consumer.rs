//! Broker Consumer
//!
//! Pulls deliveries one at a time, runs them through the transformer, hands
//! the result to the hub and settles each delivery according to the outcome:
//!
//! | outcome                 | settlement      |
//! |-------------------------|-----------------|
//! | malformed body          | requeue         |
//! | missing/invalid `value` | ack (dropped)   |
//! | encode failure          | ack (dropped)   |
//! | broadcast               | ack after send  |

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::transform::{transform, Encoder, JsonEncoder, RawEvent};
use crate::broker::{BrokerError, Delivery, Subscription};
use crate::websocket::HubHandle;

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Transformed and handed to the hub, then acked
    Broadcast,
    /// Body could not be decoded; returned to the queue
    Requeued,
    /// Permanently unprocessable; acked without broadcast
    Dropped,
}

/// Running totals per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub broadcast: u64,
    pub requeued: u64,
    pub dropped: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Broadcast => self.broadcast += 1,
            Outcome::Requeued => self.requeued += 1,
            Outcome::Dropped => self.dropped += 1,
        }
    }
}

/// Errors that end the consumer loop
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Subscription closed by broker")]
    SubscriptionClosed,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Bridges one subscription to the hub
pub struct Consumer<E = JsonEncoder> {
    hub: HubHandle,
    encoder: E,
    stats: ConsumerStats,
}

impl Consumer<JsonEncoder> {
    pub fn new(hub: HubHandle) -> Self {
        Self::with_encoder(hub, JsonEncoder)
    }
}

impl<E: Encoder> Consumer<E> {
    pub fn with_encoder(hub: HubHandle, encoder: E) -> Self {
        Self {
            hub,
            encoder,
            stats: ConsumerStats::default(),
        }
    }

    /// Consume until the subscription ends or `shutdown` is cancelled.
    ///
    /// A delivery already being processed is settled before cancellation is
    /// observed. Subscription loss is returned to the caller.
    pub async fn run<S: Subscription>(
        mut self,
        mut subscription: S,
        shutdown: CancellationToken,
    ) -> Result<ConsumerStats, ConsumerError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!(stats = ?self.stats, "Consumer stopped");
                    return Ok(self.stats);
                }
                next = subscription.next_delivery() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(ConsumerError::Broker(e)),
                None => return Err(ConsumerError::SubscriptionClosed),
            };

            self.process(&delivery).await?;
        }
    }

    /// Handle and settle a single delivery
    pub async fn process<D: Delivery>(&mut self, delivery: &D) -> Result<Outcome, ConsumerError> {
        let outcome = self.handle(delivery.body());

        match outcome {
            Outcome::Requeued => delivery.requeue().await?,
            Outcome::Broadcast | Outcome::Dropped => delivery.ack().await?,
        }

        self.stats.record(outcome);
        Ok(outcome)
    }

    fn handle(&self, body: &[u8]) -> Outcome {
        let raw = match RawEvent::from_slice(body) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Requeueing undecodable message");
                return Outcome::Requeued;
            }
        };

        let event = match transform(&raw) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, value = ?raw.value, "Dropping invalid reading");
                return Outcome::Dropped;
            }
        };

        let payload = match self.encoder.encode(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Dropping reading that failed to encode");
                return Outcome::Dropped;
            }
        };

        tracing::debug!(payload = %payload, "Broadcasting reading");
        self.hub.broadcast(payload);
        Outcome::Broadcast
    }
}
