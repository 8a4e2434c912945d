//! AMQP Subscription
//!
//! Connects to RabbitMQ, declares the durable topic exchange and queue, binds
//! them with the configured routing key and consumes with auto-ack disabled.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery as LapinDelivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};

use super::{BrokerError, Delivery, Subscription};
use crate::config::BrokerConfig;

/// Reply code sent when closing channel and connection
const REPLY_SUCCESS: u16 = 200;

/// Open connection and channel to the broker
pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Connect, open a channel and declare the exchange
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(exchange = %config.exchange, "Connected to broker");
        Ok(Self {
            connection,
            channel,
        })
    }

    /// Declare and bind the queue, then start consuming with manual acknowledgment
    pub async fn subscribe(&self, config: &BrokerConfig) -> Result<AmqpSubscription, BrokerError> {
        let queue = self
            .channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        self.channel
            .queue_bind(
                queue.name().as_str(),
                &config.exchange,
                &config.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        if config.prefetch > 0 {
            self.channel
                .basic_qos(config.prefetch, Default::default())
                .await?;
        }

        let consumer = self
            .channel
            .basic_consume(
                queue.name().as_str(),
                &config.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            queue = %config.queue,
            routing_key = %config.routing_key,
            "Consuming sensor readings"
        );
        Ok(AmqpSubscription { consumer })
    }

    /// Close the channel, then the connection. Stops any open subscription.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "shutdown").await {
            tracing::debug!(error = %e, "Channel close failed");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "shutdown").await {
            tracing::debug!(error = %e, "Connection close failed");
        }
    }
}

/// Consumer stream of one queue
pub struct AmqpSubscription {
    consumer: lapin::Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    type Delivery = AmqpDelivery;

    async fn next_delivery(&mut self) -> Option<Result<AmqpDelivery, BrokerError>> {
        self.consumer
            .next()
            .await
            .map(|result| result.map(AmqpDelivery).map_err(BrokerError::from))
    }
}

/// One unsettled AMQP message
pub struct AmqpDelivery(LapinDelivery);

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.0.data
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.0
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Delivery(format!("ack failed: {}", e)))
    }

    async fn requeue(&self) -> Result<(), BrokerError> {
        self.0
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await
            .map_err(|e| BrokerError::Delivery(format!("nack failed: {}", e)))
    }
}
