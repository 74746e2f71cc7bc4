//! Lifecycle of the ingestion pipeline and the API used by collaborators
//!
//! An [`IngestManager`] owns everything a running instance needs: the store, the
//! ingestion queue, the runtime counters and, once started, the broker and
//! processor actors. There is no process-wide state; two managers with different
//! configurations can run side by side.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::actors::broker::BrokerHandle;
use crate::actors::messages::{ConnectionStatus, RuntimeStats, TickReport};
use crate::actors::processor::{ProcessorHandle, ProcessorSettings};
use crate::config::Config;
use crate::export::Exporter;
use crate::queue::{QueueReceiver, QueueSender, ingestion_queue};
use crate::retention::RetentionSweeper;
use crate::storage::sqlite::SqliteBackend;
use crate::storage::{Alert, SensorReading, StorageBackend};

/// Readings returned by `get_latest` without a device filter
pub const LATEST_LIMIT_ALL: usize = 50;

/// Readings returned by `get_latest` for a single device
pub const LATEST_LIMIT_DEVICE: usize = 10;

/// Alerts returned by `get_active_alerts`
pub const ACTIVE_ALERTS_LIMIT: usize = 20;

/// Runtime counters merged with the store counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemStatistics {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_dropped: u64,
    pub processing_errors: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub connection_status: ConnectionStatus,
    pub total_readings: u64,
    pub unique_devices: u64,
    pub active_alerts: u64,
    pub database_size: u64,
}

struct Running {
    broker: BrokerHandle,
    processor: ProcessorHandle,
}

pub struct IngestManager {
    config: Config,
    backend: Arc<dyn StorageBackend>,
    stats: RuntimeStats,
    queue_tx: QueueSender,
    /// Handed to the processor on start
    queue_rx: Option<QueueReceiver>,
    running: Option<Running>,
}

impl IngestManager {
    /// Open the SQLite store at the configured path
    pub async fn new(config: Config) -> Result<Self> {
        let backend = SqliteBackend::new(&config.database_path)
            .await
            .with_context(|| {
                format!(
                    "failed to open database at {}",
                    config.database_path.display()
                )
            })?;

        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn StorageBackend>) -> Self {
        let (queue_tx, queue_rx) = ingestion_queue(config.queue_capacity.max(1));

        Self {
            config,
            backend,
            stats: RuntimeStats::new(),
            queue_tx,
            queue_rx: Some(queue_rx),
            running: None,
        }
    }

    /// Connect to the broker and start processing
    ///
    /// A failed connection leaves the manager stopped with status `failed`; `start`
    /// may be called again.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            bail!("ingestion is already running");
        }
        if self.queue_rx.is_none() {
            bail!("a stopped manager cannot be restarted");
        }
        self.config.validate().context("invalid configuration")?;

        let broker =
            BrokerHandle::connect(&self.config, self.queue_tx.clone(), self.stats.clone()).await?;

        let Some(queue_rx) = self.queue_rx.take() else {
            bail!("a stopped manager cannot be restarted");
        };

        let exporter = Exporter::new(
            self.backend.clone(),
            self.config.csv_export_path.clone(),
            self.config.json_export_path.clone(),
        );
        let sweeper = RetentionSweeper::new(self.backend.clone(), self.config.data_retention_days);
        let processor = ProcessorHandle::spawn(
            queue_rx,
            self.backend.clone(),
            exporter,
            sweeper,
            self.stats.clone(),
            ProcessorSettings {
                processing_interval: self.config.processing_interval(),
                export_interval: self.config.export_interval(),
            },
        );

        self.running = Some(Running { broker, processor });
        info!("ingestion started");
        Ok(())
    }

    /// Stop processing, close the broker session and release the store
    ///
    /// Messages still queued when the processor stops are lost.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        let Some(Running { broker, processor }) = self.running.take() else {
            return Ok(());
        };

        let (processor_result, broker_result) = tokio::join!(processor.shutdown(), broker.shutdown());
        if let Err(e) = broker_result {
            warn!("broker did not shut down cleanly: {e:#}");
        }
        processor_result?;

        self.backend.close().await.context("failed to close store")?;

        info!("ingestion stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.stats.status()
    }

    /// Run one processing tick right away
    pub async fn process_now(&self) -> Result<TickReport> {
        match &self.running {
            Some(running) => running.processor.tick_now().await,
            None => bail!("ingestion is not running"),
        }
    }

    /// Newest readings, 10 for a single device or 50 across all devices
    pub async fn get_latest(&self, device_id: Option<&str>) -> Result<Vec<SensorReading>> {
        let limit = if device_id.is_some() {
            LATEST_LIMIT_DEVICE
        } else {
            LATEST_LIMIT_ALL
        };

        let readings = self.backend.query_latest(device_id, limit).await?;
        Ok(readings)
    }

    pub async fn get_active_alerts(&self) -> Result<Vec<Alert>> {
        let alerts = self.backend.query_active_alerts(ACTIVE_ALERTS_LIMIT).await?;
        Ok(alerts)
    }

    /// Acknowledge an alert, returning `false` if it does not exist
    pub async fn acknowledge(&self, alert_id: i64) -> Result<bool> {
        let found = self.backend.acknowledge_alert(alert_id).await?;
        if found {
            info!("alert {alert_id} acknowledged");
        }
        Ok(found)
    }

    pub async fn get_statistics(&self) -> Result<SystemStatistics> {
        let store = self.backend.statistics().await?;
        let runtime = self.stats.snapshot();

        Ok(SystemStatistics {
            messages_received: runtime.messages_received,
            messages_processed: runtime.messages_processed,
            messages_dropped: self.queue_tx.dropped(),
            processing_errors: runtime.processing_errors,
            last_message_time: runtime.last_message_time,
            connection_status: runtime.connection_status,
            total_readings: store.total_readings,
            unique_devices: store.unique_devices,
            active_alerts: store.active_alerts,
            database_size: store.database_size,
        })
    }
}
