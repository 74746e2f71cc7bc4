//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (exporter, API callers) do not block the processor's writes
//! - **Connection pooling**: Connections are checked out per operation and returned
//!   right after, nothing holds a connection across ticks
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Limitations
//!
//! - **Concurrency**: Limited concurrent writes; a single processor writes
//! - **Distributed**: Single-machine only

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, trace};

use super::backend::{CleanupCounts, StorageBackend, StoreStatistics};
use super::error::{StorageError, StorageResult};
use super::schema::{Alert, SensorReading, Severity};
use crate::SensorFields;

const READING_COLUMNS: &str = "id, timestamp, device_id, temperature, humidity, soil_moisture, \
     ph_level, light_intensity, latitude, longitude, battery_level, signal_strength, \
     data_quality, raw_payload, processed";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create the `sensor_data` and `alerts` tables
    /// 3. Configure SQLite for WAL mode
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use agri_monitor::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./iot_sensor_data.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Open(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        info!("database initialized: {}", db_path_str);

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StorageError::Decode(format!("timestamp out of range: {millis}"))
        })
    }

    fn reading_from_row(row: &SqliteRow) -> StorageResult<SensorReading> {
        Ok(SensorReading {
            id: Some(row.try_get("id")?),
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
            device_id: row.try_get("device_id")?,
            fields: SensorFields {
                temperature: row.try_get("temperature")?,
                humidity: row.try_get("humidity")?,
                soil_moisture: row.try_get("soil_moisture")?,
                ph_level: row.try_get("ph_level")?,
                light_intensity: row.try_get("light_intensity")?,
                latitude: row.try_get("latitude")?,
                longitude: row.try_get("longitude")?,
                battery_level: row.try_get("battery_level")?,
                signal_strength: row.try_get("signal_strength")?,
            },
            data_quality: row.try_get("data_quality")?,
            raw_payload: row.try_get("raw_payload")?,
            processed: row.try_get("processed")?,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<Alert> {
        let severity: String = row.try_get("severity")?;
        let severity = severity
            .parse::<Severity>()
            .map_err(StorageError::Decode)?;

        Ok(Alert {
            id: Some(row.try_get("id")?),
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?)?,
            device_id: row.try_get("device_id")?,
            alert_type: row.try_get("alert_type")?,
            severity,
            message: row.try_get("message")?,
            acknowledged: row.try_get("acknowledged")?,
        })
    }

    fn readings_from_rows(rows: Vec<SqliteRow>) -> StorageResult<Vec<SensorReading>> {
        rows.iter().map(Self::reading_from_row).collect()
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip_all, fields(device_id = %reading.device_id))]
    async fn insert_reading(&self, reading: &SensorReading) -> StorageResult<i64> {
        let fields = &reading.fields;

        let result = sqlx::query(
            r#"
            INSERT INTO sensor_data (
                timestamp, device_id, temperature, humidity, soil_moisture,
                ph_level, light_intensity, latitude, longitude, battery_level,
                signal_strength, data_quality, raw_payload, processed
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Self::timestamp_to_millis(&reading.timestamp))
        .bind(&reading.device_id)
        .bind(fields.temperature)
        .bind(fields.humidity)
        .bind(fields.soil_moisture)
        .bind(fields.ph_level)
        .bind(fields.light_intensity)
        .bind(fields.latitude)
        .bind(fields.longitude)
        .bind(fields.battery_level)
        .bind(fields.signal_strength)
        .bind(reading.data_quality)
        .bind(&reading.raw_payload)
        .bind(reading.processed)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        trace!("stored reading #{id}");
        Ok(id)
    }

    #[instrument(skip_all, fields(device_id = %alert.device_id, severity = %alert.severity))]
    async fn insert_alert(&self, alert: &Alert) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (timestamp, device_id, alert_type, severity, message, acknowledged)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Self::timestamp_to_millis(&alert.timestamp))
        .bind(&alert.device_id)
        .bind(&alert.alert_type)
        .bind(alert.severity.to_string())
        .bind(&alert.message)
        .bind(alert.acknowledged)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        trace!("stored alert #{id}");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn query_latest(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<SensorReading>> {
        let rows = match device_id {
            Some(device_id) => {
                let sql = format!(
                    "SELECT {READING_COLUMNS} FROM sensor_data \
                     WHERE device_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?"
                );
                sqlx::query(&sql)
                    .bind(device_id)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {READING_COLUMNS} FROM sensor_data \
                     ORDER BY timestamp DESC, id DESC LIMIT ?"
                );
                sqlx::query(&sql)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let results = Self::readings_from_rows(rows)?;
        debug!("query returned {} readings", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(since = %since))]
    async fn query_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<SensorReading>> {
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM sensor_data \
             WHERE timestamp > ? ORDER BY timestamp DESC, id DESC LIMIT ?"
        );

        let rows = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&since))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Self::readings_from_rows(rows)
    }

    #[instrument(skip(self), fields(since = %since))]
    async fn query_latest_per_device(
        &self,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<SensorReading>> {
        // With a single MAX() aggregate SQLite takes the bare columns from the row
        // holding the maximum, so every column belongs to the newest reading.
        let rows = sqlx::query(
            r#"
            SELECT id, MAX(timestamp) AS timestamp, device_id, temperature, humidity,
                   soil_moisture, ph_level, light_intensity, latitude, longitude,
                   battery_level, signal_strength, data_quality, raw_payload, processed
            FROM sensor_data
            WHERE timestamp > ?
            GROUP BY device_id
            ORDER BY device_id
            "#,
        )
        .bind(Self::timestamp_to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        Self::readings_from_rows(rows)
    }

    #[instrument(skip(self))]
    async fn query_active_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, device_id, alert_type, severity, message, acknowledged
            FROM alerts
            WHERE acknowledged = 0
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn acknowledge_alert(&self, alert_id: i64) -> StorageResult<bool> {
        // Never resets the flag, so repeating the call is harmless.
        let result = sqlx::query("UPDATE alerts SET acknowledged = 1 WHERE id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;

        let found = result.rows_affected() > 0;
        if found {
            info!("alert {alert_id} acknowledged");
        } else {
            debug!("alert {alert_id} not found");
        }
        Ok(found)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<CleanupCounts> {
        let before_millis = Self::timestamp_to_millis(&before);

        let mut tx = self.pool.begin().await?;

        let readings = sqlx::query("DELETE FROM sensor_data WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

        let alerts = sqlx::query("DELETE FROM alerts WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;

        tx.commit().await?;

        Ok(CleanupCounts { readings, alerts })
    }

    #[instrument(skip(self))]
    async fn statistics(&self) -> StorageResult<StoreStatistics> {
        let (total_readings,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sensor_data")
            .fetch_one(&self.pool)
            .await?;

        let (unique_devices,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT device_id) FROM sensor_data")
                .fetch_one(&self.pool)
                .await?;

        let (active_alerts,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM alerts WHERE acknowledged = 0")
                .fetch_one(&self.pool)
                .await?;

        let database_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStatistics {
            total_readings: total_readings as u64,
            unique_devices: unique_devices as u64,
            active_alerts: active_alerts as u64,
            database_size,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
