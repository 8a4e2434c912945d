//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::Serialize;

use crate::readings::Reading;

// ============================================
// READING DTOs
// ============================================

/// List of stored readings
#[derive(Debug, Serialize)]
pub struct ReadingListResponse {
    /// Number of readings returned
    pub count: usize,
    /// Readings, oldest first
    pub readings: Vec<Reading>,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded
    pub status: String,
    /// Hub status: ok, stopped
    pub hub: String,
    /// Connected WebSocket clients
    pub clients: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
