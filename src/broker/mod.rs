//! Message Broker
//!
//! The consumer only sees a [`Subscription`] yielding [`Delivery`] values that
//! must each be acknowledged or requeued. [`amqp`] implements both on top of
//! a RabbitMQ channel in manual-acknowledgment mode.

pub mod amqp;

pub use amqp::{AmqpBroker, AmqpDelivery, AmqpSubscription};

use async_trait::async_trait;
use thiserror::Error;

/// One message pulled from a subscription, not yet settled
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message body
    fn body(&self) -> &[u8];

    /// Remove the message from the queue
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Hand the message back to the broker for redelivery
    async fn requeue(&self) -> Result<(), BrokerError>;
}

/// Ordered stream of deliveries from one queue
#[async_trait]
pub trait Subscription: Send {
    type Delivery: Delivery;

    /// Wait for the next delivery. `None` means the subscription is closed.
    async fn next_delivery(&mut self) -> Option<Result<Self::Delivery, BrokerError>>;
}

/// Errors raised by the broker layer
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Connection, channel or protocol failure
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Acknowledging or requeueing a delivery failed
    #[error("Delivery error: {0}")]
    Delivery(String),
}
