//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Shared counters**: Runtime statistics live in atomics so every component can
//!    update them without a round trip through an actor

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::export::ExportSummary;

/// Connection state of the broker client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Initial connection attempt in progress
    Connecting,

    /// Connected and subscribed
    Connected,

    /// Connection lost, reconnecting in the background
    Disconnected,

    /// The initial connection could not be established
    Failed,
}

impl ConnectionStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Connecting,
            1 => ConnectionStatus::Connected,
            2 => ConnectionStatus::Disconnected,
            _ => ConnectionStatus::Failed,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Commands that can be sent to the BrokerActor
#[derive(Debug)]
pub enum BrokerCommand {
    /// Disconnect from the broker and stop the event loop
    ///
    /// The response is sent once the disconnect has been flushed (or given up on).
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Commands that can be sent to the ProcessorActor
#[derive(Debug)]
pub enum ProcessorCommand {
    /// Process everything queued right now, bypassing the interval timer
    ///
    /// Used for testing and manual refresh operations.
    TickNow {
        respond_to: oneshot::Sender<TickReport>,
    },

    /// Rewrite the export files immediately
    ExportNow {
        respond_to: oneshot::Sender<ExportSummary>,
    },

    /// Finish the batch in progress and exit
    Shutdown,
}

/// What one processing tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Messages stored as readings
    pub processed: usize,

    /// Messages that could not be decoded or stored
    pub failed: usize,

    /// Alerts raised by the stored readings
    pub alerts_raised: usize,

    /// Export result, if the export interval had elapsed
    pub exported: Option<ExportSummary>,

    /// Rows removed by the retention sweep
    pub swept: usize,
}

/// Runtime counters and connection state shared by the broker and processor actors
#[derive(Debug, Clone, Default)]
pub struct RuntimeStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    received: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    /// Unix millis of the last received message, 0 if none
    last_message: AtomicI64,
    /// `ConnectionStatus` as its discriminant
    status: AtomicU8,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, at: DateTime<Utc>) {
        self.inner.received.fetch_add(1, Ordering::Relaxed);
        self.inner
            .last_message
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.inner.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.inner.status.store(status as u8, Ordering::Relaxed);
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.inner.status.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.inner.last_message.load(Ordering::Relaxed);
        StatsSnapshot {
            messages_received: self.inner.received.load(Ordering::Relaxed),
            messages_processed: self.inner.processed.load(Ordering::Relaxed),
            processing_errors: self.inner.errors.load(Ordering::Relaxed),
            last_message_time: (last > 0)
                .then(|| DateTime::from_timestamp_millis(last))
                .flatten(),
            connection_status: self.status(),
        }
    }
}

/// Point-in-time copy of the runtime counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub processing_errors: u64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub connection_status: ConnectionStatus,
}
