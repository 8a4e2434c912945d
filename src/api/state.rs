//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::time::Instant;

use crate::readings::ReadingService;
use crate::websocket::HubHandle;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Handle to the WebSocket client hub
    pub hub: HubHandle,
    /// Reading persistence use cases
    pub readings: ReadingService,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: HubHandle, readings: ReadingService) -> Self {
        Self {
            hub,
            readings,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
