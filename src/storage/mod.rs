//! Persistent storage for readings and alerts
//!
//! This module provides a trait-based abstraction over the store so that the
//! message processor, exporter and retention sweeper do not depend on SQLite
//! directly.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Append-only readings**: readings are never updated; alerts only get acknowledged
//!
//! ## Usage
//!
//! ```no_run
//! use agri_monitor::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./iot_sensor_data.db").await?;
//!     let stats = backend.statistics().await?;
//!     println!("{} readings stored", stats.total_readings);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use backend::{CleanupCounts, StorageBackend, StoreStatistics};
pub use error::{StorageError, StorageResult};
pub use schema::{ALERT_TYPE_THRESHOLD, Alert, SensorReading, Severity};
