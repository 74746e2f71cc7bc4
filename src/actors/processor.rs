//! ProcessorActor - turns queued messages into stored readings and alerts
//!
//! On every tick the actor drains the ingestion queue and, for each message:
//!
//! 1. decodes the payload as a UTF-8 JSON object
//! 2. takes the device id from the topic
//! 3. validates the known fields and computes the data quality
//! 4. stores the reading, then evaluates and stores its alerts
//!
//! A message that fails any step is logged and counted; the rest of the batch is
//! processed normally. After the batch the snapshot export runs if its interval has
//! elapsed, followed by the retention sweep.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, instrument, trace, warn};

use super::messages::{ProcessorCommand, RuntimeStats, TickReport};
use crate::alerts::AlertEngine;
use crate::export::Exporter;
use crate::queue::{InboundMessage, QueueReceiver};
use crate::retention::RetentionSweeper;
use crate::storage::{SensorReading, StorageBackend, StorageError};
use crate::util::device_id_from_topic;
use crate::validation;

/// Bound on how long `shutdown` waits for the actor to finish its current tick
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a single message could not be turned into a reading
#[derive(Debug)]
pub enum ProcessError {
    /// Payload bytes are not valid UTF-8
    InvalidEncoding(std::str::Utf8Error),

    /// Payload is not valid JSON
    InvalidJson(serde_json::Error),

    /// Payload is valid JSON but not an object
    NotAnObject,

    /// The reading could not be stored
    Storage(StorageError),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::InvalidEncoding(err) => write!(f, "payload is not valid UTF-8: {err}"),
            ProcessError::InvalidJson(err) => write!(f, "payload is not valid JSON: {err}"),
            ProcessError::NotAnObject => write!(f, "payload is not a JSON object"),
            ProcessError::Storage(err) => write!(f, "failed to store reading: {err}"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::InvalidEncoding(err) => Some(err),
            ProcessError::InvalidJson(err) => Some(err),
            ProcessError::NotAnObject => None,
            ProcessError::Storage(err) => Some(err),
        }
    }
}

impl From<std::str::Utf8Error> for ProcessError {
    fn from(err: std::str::Utf8Error) -> Self {
        ProcessError::InvalidEncoding(err)
    }
}

impl From<serde_json::Error> for ProcessError {
    fn from(err: serde_json::Error) -> Self {
        ProcessError::InvalidJson(err)
    }
}

impl From<StorageError> for ProcessError {
    fn from(err: StorageError) -> Self {
        ProcessError::Storage(err)
    }
}

/// Timing of the processing loop
#[derive(Debug, Clone, Copy)]
pub struct ProcessorSettings {
    pub processing_interval: Duration,
    pub export_interval: Duration,
}

pub struct ProcessorActor {
    queue: QueueReceiver,
    backend: Arc<dyn StorageBackend>,
    alert_engine: AlertEngine,
    exporter: Exporter,
    sweeper: RetentionSweeper,
    stats: RuntimeStats,
    settings: ProcessorSettings,
    last_export: Instant,
    command_rx: mpsc::Receiver<ProcessorCommand>,
}

impl ProcessorActor {
    pub fn new(
        queue: QueueReceiver,
        backend: Arc<dyn StorageBackend>,
        exporter: Exporter,
        sweeper: RetentionSweeper,
        stats: RuntimeStats,
        settings: ProcessorSettings,
        command_rx: mpsc::Receiver<ProcessorCommand>,
    ) -> Self {
        Self {
            queue,
            backend,
            alert_engine: AlertEngine::new(),
            exporter,
            sweeper,
            stats,
            settings,
            last_export: Instant::now(),
            command_rx,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting processor actor (tick every {:?}, export every {:?})",
            self.settings.processing_interval, self.settings.export_interval
        );

        let mut interval = time::interval(self.settings.processing_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(ProcessorCommand::TickNow { respond_to }) => {
                            let report = self.tick().await;
                            let _ = respond_to.send(report);
                        }
                        Some(ProcessorCommand::ExportNow { respond_to }) => {
                            let summary = self.exporter.export_all().await;
                            self.last_export = Instant::now();
                            let _ = respond_to.send(summary);
                        }
                        Some(ProcessorCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        let left = self.queue.len();
        if left > 0 {
            warn!("processor stopped with {left} unprocessed messages in the queue");
        }
        debug!("processor actor stopped");
    }

    /// Process one batch, then export and sweep
    pub async fn tick(&mut self) -> TickReport {
        let batch = self.queue.drain();
        let mut report = TickReport::default();

        if !batch.is_empty() {
            trace!("processing batch of {} messages", batch.len());
        }

        for message in &batch {
            match self.process_message(message).await {
                Ok(alerts) => {
                    report.processed += 1;
                    report.alerts_raised += alerts;
                    self.stats.record_processed();
                }
                Err(e) => {
                    report.failed += 1;
                    self.stats.record_error();
                    error!(topic = %message.topic, "failed to process message: {e}");
                }
            }
        }

        if self.export_due() {
            report.exported = Some(self.exporter.export_all().await);
            self.last_export = Instant::now();
        }

        if let Some(counts) = self.sweeper.sweep().await {
            report.swept = counts.total();
        }

        if report.processed > 0 || report.failed > 0 {
            debug!(
                "tick done: {} processed, {} failed, {} alerts",
                report.processed, report.failed, report.alerts_raised
            );
        }

        report
    }

    /// The first export happens one full interval after the actor is created
    fn export_due(&self) -> bool {
        self.last_export.elapsed() > self.settings.export_interval
    }

    /// Parse, validate and store one message, returning the number of alerts stored
    ///
    /// Alerts that fail to store are logged and counted as errors but do not fail the
    /// message, since its reading is already persisted.
    pub async fn process_message(&self, message: &InboundMessage) -> Result<usize, ProcessError> {
        let text = std::str::from_utf8(&message.payload)?;
        let Value::Object(data) = serde_json::from_str::<Value>(text)? else {
            return Err(ProcessError::NotAnObject);
        };

        let device_id = device_id_from_topic(&message.topic);
        let validation = validation::validate(&data);
        let reading = SensorReading::new(device_id, message.received_at, validation, text);

        let id = self.backend.insert_reading(&reading).await?;
        trace!(
            "stored reading {id} from {device_id} (quality {:.2})",
            reading.data_quality
        );

        let mut stored = 0;
        for alert in self.alert_engine.evaluate(&reading) {
            match self.backend.insert_alert(&alert).await {
                Ok(_) => stored += 1,
                Err(e) => {
                    self.stats.record_error();
                    error!("failed to store alert for {device_id}: {e}");
                }
            }
        }

        Ok(stored)
    }
}

/// Handle for controlling a ProcessorActor
pub struct ProcessorHandle {
    sender: mpsc::Sender<ProcessorCommand>,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Spawn a new processor actor
    pub fn spawn(
        queue: QueueReceiver,
        backend: Arc<dyn StorageBackend>,
        exporter: Exporter,
        sweeper: RetentionSweeper,
        stats: RuntimeStats,
        settings: ProcessorSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = ProcessorActor::new(queue, backend, exporter, sweeper, stats, settings, cmd_rx);

        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task,
        }
    }

    /// Process everything currently queued and wait for the result
    pub async fn tick_now(&self) -> Result<TickReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProcessorCommand::TickNow { respond_to: tx })
            .await
            .context("failed to send TickNow command")?;

        rx.await.context("failed to receive response")
    }

    /// Rewrite the export files and wait for the result
    pub async fn export_now(&self) -> Result<crate::export::ExportSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProcessorCommand::ExportNow { respond_to: tx })
            .await
            .context("failed to send ExportNow command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop the actor after its current tick
    ///
    /// Waits at most [`SHUTDOWN_JOIN_TIMEOUT`]; if the actor has not stopped by then,
    /// it is left running and anything still queued is lost.
    pub async fn shutdown(self) -> Result<()> {
        // The actor may already be gone, joining below still reports how it ended
        let _ = self.sender.send(ProcessorCommand::Shutdown).await;

        match time::timeout(SHUTDOWN_JOIN_TIMEOUT, self.task).await {
            Ok(joined) => joined.context("processor task panicked"),
            Err(_) => {
                warn!(
                    "processor did not stop within {}s, continuing shutdown",
                    SHUTDOWN_JOIN_TIMEOUT.as_secs()
                );
                Ok(())
            }
        }
    }
}

impl fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
