//! Client Sink
//!
//! One connected client: a bounded outbound queue owned by the hub on the
//! producing side and a writer loop that drains it into the client transport.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::hub::HubHandle;

/// Serialized event as it is handed to every sink
pub type Payload = Arc<str>;

/// Opaque identity of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(Uuid);

impl SinkId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a sink left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Transport ended or the client asked to unregister
    Disconnected,
    /// Outbound queue was full when a broadcast arrived
    Overflow,
    /// Hub is stopping; pending payloads are still delivered
    Shutdown,
}

/// Producer half of a client sink, owned by the hub registry
#[derive(Debug)]
pub struct ClientSink {
    id: SinkId,
    queue: mpsc::Sender<Payload>,
    stop: CancellationToken,
}

/// Consumer half of a client sink, owned by the sink's writer task
#[derive(Debug)]
pub struct SinkQueue {
    id: SinkId,
    queue: mpsc::Receiver<Payload>,
    stop: CancellationToken,
}

impl ClientSink {
    /// Create both halves of a sink with the given queue capacity (at least 1)
    pub fn channel(capacity: usize) -> (ClientSink, SinkQueue) {
        let id = SinkId::new();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stop = CancellationToken::new();

        let sink = ClientSink {
            id,
            queue: tx,
            stop: stop.clone(),
        };
        let queue = SinkQueue {
            id,
            queue: rx,
            stop,
        };
        (sink, queue)
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Enqueue without waiting. A full or closed queue means the sink is unhealthy.
    pub(crate) fn try_enqueue(&self, payload: Payload) -> Result<(), RemovalReason> {
        match self.queue.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RemovalReason::Overflow),
            Err(TrySendError::Closed(_)) => Err(RemovalReason::Disconnected),
        }
    }

    /// Drop the producer half. Only a shutdown lets the writer drain what is queued.
    pub(crate) fn release(self, reason: RemovalReason) {
        if reason != RemovalReason::Shutdown {
            self.stop.cancel();
        }
    }
}

impl SinkQueue {
    pub fn id(&self) -> SinkId {
        self.id
    }

    /// Whether the hub released this sink without a drain
    pub fn is_released(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Next queued payload, or `None` once the hub dropped the sink and the queue is empty
    pub async fn recv(&mut self) -> Option<Payload> {
        self.queue.recv().await
    }

    /// Next queued payload if one is immediately available
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.queue.try_recv().ok()
    }
}

/// Errors raised by a client transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    Send(String),
}

/// Outbound half of a client connection
#[async_trait]
pub trait Transport: Send {
    /// Write one payload to the client
    async fn send(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Close the transport; errors are ignored
    async fn close(&mut self);
}

/// How a writer loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// Hub dropped the sink and every queued payload was written
    Drained,
    /// Hub released the sink (overflow or disconnect), queue discarded
    Released,
    /// A write failed; the sink unregistered itself
    TransportFailed,
}

/// Drain a sink queue into its transport until the sink is released or a write fails.
pub async fn run_writer<T: Transport>(
    mut transport: T,
    mut queue: SinkQueue,
    hub: HubHandle,
) -> WriterExit {
    let sink_id = queue.id;
    let stop = queue.stop.clone();

    let exit = loop {
        let payload = tokio::select! {
            biased;
            _ = stop.cancelled() => break WriterExit::Released,
            next = queue.queue.recv() => match next {
                Some(payload) => payload,
                None => break WriterExit::Drained,
            },
        };

        let result = tokio::select! {
            biased;
            _ = stop.cancelled() => break WriterExit::Released,
            result = transport.send(&payload) => result,
        };

        if let Err(e) = result {
            tracing::debug!(sink_id = %sink_id, error = %e, "Client write failed, removing sink");
            hub.unregister(sink_id);
            break WriterExit::TransportFailed;
        }
    };

    transport.close().await;
    tracing::debug!(sink_id = %sink_id, exit = ?exit, "Sink writer stopped");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::hub::{Hub, HubConfig};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Transport double that records writes and can be told to fail
    struct RecordingTransport {
        written: mpsc::UnboundedSender<String>,
        fail_after: Option<usize>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&mut self, payload: &str) -> Result<(), TransportError> {
            if let Some(remaining) = self.fail_after.as_mut() {
                if *remaining == 0 {
                    return Err(TransportError::Send("connection reset".to_string()));
                }
                *remaining -= 1;
            }
            self.written
                .send(payload.to_string())
                .map_err(|e| TransportError::Send(e.to_string()))
        }

        async fn close(&mut self) {
            self.closed
                .store(true, Ordering::SeqCst);
        }
    }

    fn recording(
        fail_after: Option<usize>,
    ) -> (
        RecordingTransport,
        mpsc::UnboundedReceiver<String>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = RecordingTransport {
            written: tx,
            fail_after,
            closed: Arc::clone(&closed),
        };
        (transport, rx, closed)
    }

    #[test]
    fn test_try_enqueue_reports_overflow() {
        let (sink, _queue) = ClientSink::channel(1);
        assert!(sink.try_enqueue(Payload::from("a")).is_ok());
        assert_eq!(
            sink.try_enqueue(Payload::from("b")),
            Err(RemovalReason::Overflow)
        );
    }

    #[test]
    fn test_try_enqueue_reports_closed_queue() {
        let (sink, queue) = ClientSink::channel(4);
        drop(queue);
        assert_eq!(
            sink.try_enqueue(Payload::from("a")),
            Err(RemovalReason::Disconnected)
        );
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (sink, mut queue) = ClientSink::channel(0);
        assert!(sink.try_enqueue(Payload::from("only")).is_ok());
        assert_eq!(queue.try_recv().as_deref(), Some("only"));
    }

    #[test]
    fn test_release_cancels_unless_shutdown() {
        let (sink, queue) = ClientSink::channel(1);
        sink.release(RemovalReason::Shutdown);
        assert!(!queue.is_released());

        let (sink, queue) = ClientSink::channel(1);
        sink.release(RemovalReason::Overflow);
        assert!(queue.is_released());
    }

    #[tokio::test]
    async fn test_writer_drains_in_order_on_shutdown() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, queue) = ClientSink::channel(8);
        let (transport, mut written, closed) = recording(None);

        sink.try_enqueue(Payload::from("one")).unwrap();
        sink.try_enqueue(Payload::from("two")).unwrap();
        sink.release(RemovalReason::Shutdown);

        let exit = run_writer(transport, queue, hub).await;
        assert_eq!(exit, WriterExit::Drained);
        assert_eq!(written.recv().await.as_deref(), Some("one"));
        assert_eq!(written.recv().await.as_deref(), Some("two"));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_writer_stops_without_draining_when_released() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, queue) = ClientSink::channel(8);
        let (transport, mut written, _closed) = recording(None);

        sink.try_enqueue(Payload::from("stale")).unwrap();
        sink.release(RemovalReason::Overflow);

        let exit = run_writer(transport, queue, hub).await;
        assert_eq!(exit, WriterExit::Released);
        assert!(written.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_writer_unregisters_itself_on_write_failure() {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let (sink, queue) = ClientSink::channel(8);
        let (transport, mut written, closed) = recording(Some(1));

        hub.register(sink);
        assert_eq!(hub.connection_count().await, 1);

        hub.broadcast(Payload::from("first"));
        hub.broadcast(Payload::from("second"));

        let exit = run_writer(transport, queue, hub.clone()).await;
        assert_eq!(exit, WriterExit::TransportFailed);
        assert_eq!(written.recv().await.as_deref(), Some("first"));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(hub.connection_count().await, 0);
    }
}
