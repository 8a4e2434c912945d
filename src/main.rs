//! Humidity Relay
//!
//! Run with: cargo run -- [--config <path>] [serve | print-config]
//!
//! Shutdown order on SIGINT/SIGTERM: stop consuming and close the broker
//! connection, then stop the hub and wait for client writers to drain their
//! queues, then stop the HTTP server.

use anyhow::Context;
use clap::{Parser, Subcommand};
use humidity_relay::api::{self, AppState};
use humidity_relay::broker::AmqpBroker;
use humidity_relay::config::{
    generate_default_config, BrokerConfig, Config, ConfigError, LoggingConfig, StorageBackend,
    StorageConfig,
};
use humidity_relay::pipeline::{Consumer, ConsumerStats};
use humidity_relay::readings::{
    InMemoryReadingRepository, ReadingRepository, ReadingService, SqliteReadingRepository,
};
use humidity_relay::websocket::{Hub, HubHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upper bound on waiting for client writers to flush at shutdown
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "humidity-relay", version, about = "Relay broker humidity readings to WebSocket dashboards")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay (default)
    Serve,
    /// Print a commented default configuration
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Command::PrintConfig) = cli.command {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let (config, source) = match load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    init_tracing(&config.logging);
    tracing::info!("Starting Humidity Relay v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        Some(path) => tracing::info!("Loaded config from {:?}", path),
        None => tracing::info!("Using default config with environment overrides"),
    }

    let repository = build_repository(&config.storage)?;
    let readings = ReadingService::new(repository);

    let (hub, hub_task) = Hub::spawn(config.hub.clone());
    tracing::info!(sink_capacity = hub.sink_capacity(), "Client hub started");

    let consumer_stop = CancellationToken::new();
    let mut consumer = tokio::spawn(run_consumer(
        config.broker.clone(),
        hub.clone(),
        consumer_stop.clone(),
    ));

    let server_stop = CancellationToken::new();
    let mut server = tokio::spawn({
        let state = AppState::new(hub.clone(), readings);
        let addr = config.server.addr();
        let stop = server_stop.clone();
        async move { api::serve(state, &addr, async move { stop.cancelled().await }).await }
    });

    let early_exit = tokio::select! {
        _ = api::shutdown_signal() => None,
        result = &mut server => Some(result),
        _ = &mut consumer => {
            tracing::warn!("Broker consumer exited on its own");
            None
        }
    };

    consumer_stop.cancel();
    if !consumer.is_finished() {
        if let Err(e) = consumer.await {
            tracing::error!(error = %e, "Consumer task panicked");
        }
    }

    hub.shutdown();
    if let Err(e) = hub_task.await {
        tracing::error!(error = %e, "Hub task panicked");
    }
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, hub.writers_finished())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = WRITER_DRAIN_TIMEOUT.as_secs(),
            "Client writers still draining, closing anyway"
        );
    }

    server_stop.cancel();
    let server_result = match early_exit {
        Some(result) => result,
        None => server.await,
    };
    server_result
        .context("HTTP server task panicked")?
        .context("HTTP server failed")?;

    tracing::info!("Humidity Relay stopped");
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<(Config, Option<PathBuf>), ConfigError> {
    match path {
        Some(path) => Config::load_with_env(path).map(|config| (config, Some(path.to_path_buf()))),
        None => Config::load_default(),
    }
}

/// Initialize tracing from the logging section; `RUST_LOG` takes precedence
fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "humidity_relay={level},tower_http={level}",
            level = config.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_repository(config: &StorageConfig) -> anyhow::Result<Arc<dyn ReadingRepository>> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory readings repository");
            let repository: Arc<dyn ReadingRepository> = Arc::new(InMemoryReadingRepository::new());
            Ok(repository)
        }
        StorageBackend::Sqlite => {
            tracing::info!(path = %config.path, "Using SQLite readings repository");
            let repository: Arc<dyn ReadingRepository> = Arc::new(
                SqliteReadingRepository::open(Path::new(&config.path))
                    .with_context(|| format!("opening readings database {}", config.path))?,
            );
            Ok(repository)
        }
    }
}

/// Consume until shutdown, reconnecting after the broker connection is lost
async fn run_consumer(config: BrokerConfig, hub: HubHandle, shutdown: CancellationToken) {
    let delay = Duration::from_secs(config.reconnect_delay_secs);

    while !shutdown.is_cancelled() {
        match consume_once(&config, &hub, &shutdown).await {
            Ok(stats) => {
                tracing::info!(
                    broadcast = stats.broadcast,
                    requeued = stats.requeued,
                    dropped = stats.dropped,
                    "Broker consumer finished"
                );
                return;
            }
            Err(e) => {
                tracing::error!(
                    error = %format!("{:#}", e),
                    retry_in_secs = delay.as_secs(),
                    "Broker consumer failed"
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn consume_once(
    config: &BrokerConfig,
    hub: &HubHandle,
    shutdown: &CancellationToken,
) -> anyhow::Result<ConsumerStats> {
    let broker = tokio::select! {
        _ = shutdown.cancelled() => return Ok(ConsumerStats::default()),
        broker = AmqpBroker::connect(config) => broker.context("connecting to broker")?,
    };

    let subscription = match broker.subscribe(config).await {
        Ok(subscription) => subscription,
        Err(e) => {
            broker.close().await;
            return Err(e).context("subscribing to readings queue");
        }
    };

    let result = Consumer::new(hub.clone())
        .run(subscription, shutdown.clone())
        .await;
    broker.close().await;
    Ok(result?)
}
