use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{NewReading, Reading, ReadingRepository, RepositoryError};

/// Volatile repository; readings are lost on restart
#[derive(Default)]
pub struct InMemoryReadingRepository {
    rows: RwLock<Vec<Reading>>,
}

impl InMemoryReadingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingRepository for InMemoryReadingRepository {
    async fn save(&self, reading: NewReading) -> Result<Reading, RepositoryError> {
        let mut rows = self.rows.write().await;
        let stored = Reading {
            id: rows.len() as i64 + 1,
            value: reading.value,
            unit: reading.unit,
            device: reading.device,
            sensor_type: reading.sensor_type,
            recorded_at: Utc::now(),
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn get_all(&self) -> Result<Vec<Reading>, RepositoryError> {
        Ok(self.rows.read().await.clone())
    }
}
