//! WebSocket Client Hub
//!
//! Owns the registry of connected client sinks. The registry lives inside a
//! single task; every membership change and every broadcast reaches it as a
//! [`Command`] over a channel, so the set itself is never shared or locked.
//!
//! Sink writers are spawned through the handle and tracked, so shutdown can
//! wait until every writer has drained its queue.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use super::sink::{
    run_writer, ClientSink, Payload, RemovalReason, SinkId, SinkQueue, Transport, WriterExit,
};

/// Configuration for the client hub
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Outbound queue capacity of every client sink
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

fn default_sink_capacity() -> usize {
    256
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            sink_capacity: default_sink_capacity(),
        }
    }
}

/// Requests processed by the hub loop, one at a time
enum Command {
    Register(ClientSink),
    Unregister(SinkId),
    Broadcast(Payload),
    Count(oneshot::Sender<usize>),
    Shutdown,
}

/// The hub loop and the registry it owns
pub struct Hub {
    commands: mpsc::UnboundedReceiver<Command>,
    sinks: HashMap<SinkId, ClientSink>,
}

/// Cloneable handle for talking to a running hub
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
    writers: TaskTracker,
    config: Arc<HubConfig>,
}

impl Hub {
    /// Create a hub and its handle without starting the loop
    pub fn new(config: HubConfig) -> (Hub, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub {
            commands: rx,
            sinks: HashMap::new(),
        };
        let handle = HubHandle {
            commands: tx,
            writers: TaskTracker::new(),
            config: Arc::new(config),
        };
        (hub, handle)
    }

    /// Create a hub and run its loop on a new task
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Hub::new(config);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::debug!("Hub loop started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register(sink) => self.register(sink),
                Command::Unregister(id) => self.remove(id, RemovalReason::Disconnected),
                Command::Broadcast(payload) => self.broadcast(payload),
                Command::Count(reply) => {
                    let _ = reply.send(self.sinks.len());
                }
                Command::Shutdown => break,
            }
        }

        let remaining = self.sinks.len();
        for (_, sink) in self.sinks.drain() {
            sink.release(RemovalReason::Shutdown);
        }

        tracing::info!(sinks = remaining, "Hub stopped");
    }

    fn register(&mut self, sink: ClientSink) {
        let id = sink.id();
        self.sinks.insert(id, sink);
        tracing::info!(sink_id = %id, clients = self.sinks.len(), "Client connected");
    }

    fn remove(&mut self, id: SinkId, reason: RemovalReason) {
        if let Some(sink) = self.sinks.remove(&id) {
            sink.release(reason);
            match reason {
                RemovalReason::Overflow => {
                    tracing::warn!(sink_id = %id, "Client too slow, queue full; disconnecting")
                }
                _ => tracing::info!(
                    sink_id = %id,
                    reason = ?reason,
                    clients = self.sinks.len(),
                    "Client removed"
                ),
            }
        }
    }

    fn broadcast(&mut self, payload: Payload) {
        let mut unhealthy = Vec::new();

        for (id, sink) in &self.sinks {
            if let Err(reason) = sink.try_enqueue(Payload::clone(&payload)) {
                unhealthy.push((*id, reason));
            }
        }

        let delivered = self.sinks.len() - unhealthy.len();
        for (id, reason) in unhealthy {
            self.remove(id, reason);
        }

        tracing::trace!(clients = delivered, "Broadcast dispatched");
    }
}

impl HubHandle {
    /// Add a sink to the registry. Each connection must be registered once.
    pub fn register(&self, sink: ClientSink) {
        if self.commands.send(Command::Register(sink)).is_err() {
            tracing::debug!("Hub stopped, dropping new client");
        }
    }

    /// Remove a sink if it is still registered
    pub fn unregister(&self, id: SinkId) {
        let _ = self.commands.send(Command::Unregister(id));
    }

    /// Queue a payload for every registered sink. Never waits on any client.
    pub fn broadcast(&self, payload: Payload) {
        let _ = self.commands.send(Command::Broadcast(payload));
    }

    /// Number of registered sinks, or 0 once the hub has stopped
    pub async fn connection_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Count(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Ask the loop to release every sink (letting writers drain) and exit
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Run a sink writer on a task tracked by this hub
    pub fn spawn_writer<T>(&self, transport: T, queue: SinkQueue) -> JoinHandle<WriterExit>
    where
        T: Transport + 'static,
    {
        self.writers.spawn(run_writer(transport, queue, self.clone()))
    }

    /// Wait until every tracked writer has exited.
    ///
    /// After [`shutdown`](Self::shutdown) and the hub loop exiting, this
    /// resolves once each writer has written its remaining queue and closed
    /// its transport.
    pub async fn writers_finished(&self) {
        self.writers.close();
        self.writers.wait().await;
    }

    /// Whether the hub loop is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Outbound queue capacity for new sinks
    pub fn sink_capacity(&self) -> usize {
        self.config.sink_capacity
    }
}
