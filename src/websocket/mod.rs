//! WebSocket Live Updates
//!
//! Fans normalized sensor events out to every connected dashboard.
//!
//! ## Architecture
//!
//! - **Hub**: single task owning the set of client sinks; register, unregister
//!   and broadcast arrive over a channel and are handled one at a time
//! - **ClientSink**: bounded outbound queue plus a writer loop per client; a
//!   client whose queue is full when a broadcast arrives is disconnected
//! - **Handler**: HTTP upgrade at `/ws`, one sink per accepted socket
//!
//! Clients do not send anything; every broadcast reaches every client.
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:8002/ws');
//! ws.onmessage = (event) => console.log(JSON.parse(event.data).humedad);
//! ```

mod handler;
mod hub;
mod sink;

pub use handler::websocket_handler;
pub use hub::{Hub, HubConfig, HubHandle};
pub use sink::{
    run_writer, ClientSink, Payload, RemovalReason, SinkId, SinkQueue, Transport,
    TransportError, WriterExit,
};
