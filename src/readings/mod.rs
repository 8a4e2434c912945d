//! Readings Repository
//!
//! Storage contract for humidity readings and the use case the HTTP routes
//! call. Two backends: in-memory and SQLite.

mod memory;
mod sqlite;

pub use memory::InMemoryReadingRepository;
pub use sqlite::SqliteReadingRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A stored reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub value: f64,
    pub unit: Option<String>,
    pub device: Option<String>,
    pub sensor_type: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A reading to be stored
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewReading {
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub sensor_type: Option<String>,
}

/// Errors raised by a readings repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Invalid reading: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt row: {0}")]
    Corruption(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Persistence contract for readings
#[async_trait]
pub trait ReadingRepository: Send + Sync {
    async fn save(&self, reading: NewReading) -> Result<Reading, RepositoryError>;

    /// All readings, oldest first
    async fn get_all(&self) -> Result<Vec<Reading>, RepositoryError>;
}

/// Reading use cases
#[derive(Clone)]
pub struct ReadingService {
    repository: Arc<dyn ReadingRepository>,
}

impl ReadingService {
    pub fn new(repository: Arc<dyn ReadingRepository>) -> Self {
        Self { repository }
    }

    pub async fn save_reading(&self, reading: NewReading) -> Result<Reading, RepositoryError> {
        if !reading.value.is_finite() {
            return Err(RepositoryError::Invalid(format!(
                "value must be a finite number, got {}",
                reading.value
            )));
        }
        self.repository.save(reading).await
    }

    pub async fn all_readings(&self) -> Result<Vec<Reading>, RepositoryError> {
        self.repository.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ReadingService {
        ReadingService::new(Arc::new(InMemoryReadingRepository::new()))
    }

    #[tokio::test]
    async fn test_save_and_list() {
        let service = service();
        let saved = service
            .save_reading(NewReading {
                value: 48.0,
                unit: Some("%".to_string()),
                device: Some("esp32-1".to_string()),
                sensor_type: None,
            })
            .await
            .unwrap();

        let all = service.all_readings().await.unwrap();
        assert_eq!(all, vec![saved]);
    }

    #[tokio::test]
    async fn test_non_finite_value_rejected() {
        let service = service();
        let result = service
            .save_reading(NewReading {
                value: f64::NAN,
                unit: None,
                device: None,
                sensor_type: None,
            })
            .await;
        assert!(matches!(result, Err(RepositoryError::Invalid(_))));
        assert!(service.all_readings().await.unwrap().is_empty());
    }

    #[test]
    fn test_new_reading_optional_fields() {
        let reading: NewReading = serde_json::from_str(r#"{"value": 51.5}"#).unwrap();
        assert_eq!(reading.value, 51.5);
        assert!(reading.unit.is_none());
        assert!(reading.device.is_none());
    }
}
