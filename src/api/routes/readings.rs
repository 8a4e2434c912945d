//! Reading Routes
//!
//! - GET /api/v1/readings - List stored readings
//! - POST /api/v1/readings - Store a reading

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::ReadingListResponse;
use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::readings::{NewReading, Reading};

/// GET /api/v1/readings
pub async fn list_readings(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ReadingListResponse>> {
    let readings = state.readings.all_readings().await?;
    Ok(Json(ReadingListResponse {
        count: readings.len(),
        readings,
    }))
}

/// POST /api/v1/readings
pub async fn create_reading(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewReading>,
) -> ApiResult<(StatusCode, Json<Reading>)> {
    let reading = state.readings.save_reading(req).await?;
    tracing::debug!(id = reading.id, value = reading.value, "Reading stored");
    Ok((StatusCode::CREATED, Json(reading)))
}
