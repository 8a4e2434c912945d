//! # Humidity Relay
//!
//! Bridges humidity readings published to an AMQP broker to live WebSocket
//! dashboards.
//!
//! ## Data flow
//!
//! ```text
//! broker delivery → Consumer → transform → Hub.broadcast → ClientSink queue → socket
//! ```
//!
//! ## Modules
//!
//! - [`websocket`]: client hub, per-client sinks and the `/ws` upgrade handler
//! - [`pipeline`]: message transformer and the broker consumer
//! - [`broker`]: subscription traits and the RabbitMQ implementation
//! - [`readings`]: readings repository contract and backends
//! - [`api`]: HTTP router (WebSocket, readings, health)
//! - [`config`]: TOML + environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use humidity_relay::broker::AmqpBroker;
//! use humidity_relay::config::Config;
//! use humidity_relay::pipeline::Consumer;
//! use humidity_relay::websocket::{Hub, HubConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let (hub, _hub_task) = Hub::spawn(HubConfig::default());
//!
//!     let broker = AmqpBroker::connect(&config.broker).await?;
//!     let subscription = broker.subscribe(&config.broker).await?;
//!
//!     Consumer::new(hub).run(subscription, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod broker;
pub mod config;
pub mod pipeline;
pub mod readings;
pub mod websocket;

pub use api::{build_router, serve, serve_listener, ApiError, AppState};

pub use broker::{AmqpBroker, BrokerError, Delivery, Subscription};

pub use config::{
    generate_default_config, BrokerConfig, Config, ConfigError, LoggingConfig, ServerConfig,
    StorageBackend, StorageConfig,
};

pub use pipeline::{
    transform, Consumer, ConsumerError, ConsumerStats, Encoder, JsonEncoder, NormalizedEvent,
    Outcome, RawEvent, ValidationError,
};

pub use readings::{
    InMemoryReadingRepository, NewReading, Reading, ReadingRepository, ReadingService,
    RepositoryError, SqliteReadingRepository,
};

pub use websocket::{ClientSink, Hub, HubConfig, HubHandle, Payload, SinkId};
