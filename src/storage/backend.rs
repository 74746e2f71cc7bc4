//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{Alert, SensorReading};

/// Counts reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    /// Number of stored readings
    pub total_readings: u64,

    /// Number of distinct devices with at least one stored reading
    pub unique_devices: u64,

    /// Number of unacknowledged alerts
    pub active_alerts: u64,

    /// Size of the database on disk in bytes
    pub database_size: u64,
}

/// Rows removed by a retention cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupCounts {
    pub readings: usize,
    pub alerts: usize,
}

impl CleanupCounts {
    pub fn total(&self) -> usize {
        self.readings + self.alerts
    }
}

/// Trait for persistent storage backends
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// message processor and the collaborator-facing API.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>` which wraps `StorageError`.
/// Implementations should convert backend-specific errors to
/// `StorageError` variants.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append a reading, returning its row id
    async fn insert_reading(&self, reading: &SensorReading) -> StorageResult<i64>;

    /// Append an alert, returning its row id
    async fn insert_alert(&self, alert: &Alert) -> StorageResult<i64>;

    /// The newest readings, optionally restricted to one device
    ///
    /// Results are ordered by timestamp, newest first.
    async fn query_latest(
        &self,
        device_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<SensorReading>>;

    /// Readings received after `since`, newest first
    async fn query_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<SensorReading>>;

    /// The single most recent reading per device received after `since`
    ///
    /// Results are ordered by device id.
    async fn query_latest_per_device(
        &self,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<SensorReading>>;

    /// Unacknowledged alerts, newest first
    async fn query_active_alerts(&self, limit: usize) -> StorageResult<Vec<Alert>>;

    /// Mark an alert as acknowledged
    ///
    /// Acknowledging an alert twice is not an error. Returns `false` if no alert with
    /// this id exists.
    async fn acknowledge_alert(&self, alert_id: i64) -> StorageResult<bool>;

    /// Delete readings and alerts older than the specified timestamp
    ///
    /// Used for retention policy enforcement.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<CleanupCounts>;

    /// Row counts and on-disk size
    async fn statistics(&self) -> StorageResult<StoreStatistics>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
