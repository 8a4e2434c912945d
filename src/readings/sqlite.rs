//! SQLite-backed readings repository
//!
//! One connection behind a mutex; every call runs on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{NewReading, Reading, ReadingRepository, RepositoryError};

pub struct SqliteReadingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteReadingRepository {
    /// Create or open the readings database at `path`
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value REAL NOT NULL,
                unit TEXT,
                device TEXT,
                sensor_type TEXT,
                recorded_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| RepositoryError::Lock(e.to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| RepositoryError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ReadingRepository for SqliteReadingRepository {
    async fn save(&self, reading: NewReading) -> Result<Reading, RepositoryError> {
        self.with_conn(move |conn| {
            let recorded_at = Utc::now().trunc_subsecs(6);
            conn.execute(
                "INSERT INTO readings (value, unit, device, sensor_type, recorded_at)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    reading.value,
                    reading.unit,
                    reading.device,
                    reading.sensor_type,
                    recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true)
                ],
            )?;

            Ok(Reading {
                id: conn.last_insert_rowid(),
                value: reading.value,
                unit: reading.unit,
                device: reading.device,
                sensor_type: reading.sensor_type,
                recorded_at,
            })
        })
        .await
    }

    async fn get_all(&self) -> Result<Vec<Reading>, RepositoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, value, unit, device, sensor_type, recorded_at
                 FROM readings ORDER BY id",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut readings = Vec::new();
            for row in rows {
                let (id, value, unit, device, sensor_type, recorded_at) = row?;
                let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                    .map_err(|e| RepositoryError::Corruption(format!("row {}: {}", id, e)))?
                    .with_timezone(&Utc);
                readings.push(Reading {
                    id,
                    value,
                    unit,
                    device,
                    sensor_type,
                    recorded_at,
                });
            }
            Ok(readings)
        })
        .await
    }
}
