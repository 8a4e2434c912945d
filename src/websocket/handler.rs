//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and manages the connection lifecycle.
//! Every accepted socket becomes one client sink registered with the hub.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;

use super::hub::HubHandle;
use super::sink::{ClientSink, Transport, TransportError};
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// Connections are accepted from any origin.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let (sender, mut receiver) = socket.split();

    let (sink, queue) = ClientSink::channel(hub.sink_capacity());
    let sink_id = sink.id();
    hub.register(sink);

    let mut send_task = hub.spawn_writer(sender, queue);

    // Inbound frames carry no application protocol; only watch for the end
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    tracing::debug!(sink_id = %sink_id, "Client requested close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(sink_id = %sink_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    hub.unregister(sink_id);
}

#[async_trait]
impl Transport for SplitSink<WebSocket, Message> {
    async fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        SinkExt::send(self, Message::Text(payload.to_owned()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = SinkExt::close(self).await;
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{serve_listener, AppState};
    use crate::readings::{InMemoryReadingRepository, ReadingService};
    use crate::websocket::{Hub, HubConfig, HubHandle, Payload};
    use futures_util::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::client::IntoClientRequest};
    use tokio_util::sync::CancellationToken;

    async fn start_server() -> (String, HubHandle, CancellationToken) {
        let (hub, _task) = Hub::spawn(HubConfig::default());
        let readings = ReadingService::new(Arc::new(InMemoryReadingRepository::new()));
        let state = AppState::new(hub.clone(), readings);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = CancellationToken::new();
        let server_stop = stop.clone();
        tokio::spawn(serve_listener(state, listener, async move {
            server_stop.cancelled().await
        }));

        (format!("ws://{}/ws", addr), hub, stop)
    }

    async fn wait_for_clients(hub: &HubHandle, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.connection_count().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client count not reached");
    }

    #[tokio::test]
    async fn test_socket_from_foreign_origin_receives_broadcast_and_unregisters_on_close() {
        let (url, hub, stop) = start_server().await;

        let mut request = url.into_client_request().unwrap();
        request.headers_mut().insert(
            "Origin",
            "http://dashboard.elsewhere.example".parse().unwrap(),
        );
        let (mut socket, response) = connect_async(request).await.unwrap();
        assert_eq!(response.status().as_u16(), 101);
        wait_for_clients(&hub, 1).await;

        hub.broadcast(Payload::from(r#"{"humedad":55.2}"#));
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame received")
            .unwrap()
            .unwrap();
        assert!(frame.is_text());
        assert_eq!(frame.to_text().unwrap(), r#"{"humedad":55.2}"#);

        socket.close(None).await.unwrap();
        wait_for_clients(&hub, 0).await;

        stop.cancel();
    }

    #[tokio::test]
    async fn test_dropped_connection_unregisters_sink() {
        let (url, hub, stop) = start_server().await;

        let (socket, _response) = connect_async(url).await.unwrap();
        wait_for_clients(&hub, 1).await;

        drop(socket);
        wait_for_clients(&hub, 0).await;

        stop.cancel();
    }
}
