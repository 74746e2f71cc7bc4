//! Retention policy enforcement
//!
//! Readings and alerts older than the configured number of days are deleted. The
//! sweep runs after every processing batch; when nothing has expired it is a pair
//! of indexed deletes that touch no rows.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, instrument, trace};

use crate::storage::{CleanupCounts, StorageBackend};

pub struct RetentionSweeper {
    backend: Arc<dyn StorageBackend>,
    retention_days: u32,
    last_sweep: Option<DateTime<Utc>>,
    total_deleted: u64,
}

impl RetentionSweeper {
    pub fn new(backend: Arc<dyn StorageBackend>, retention_days: u32) -> Self {
        Self {
            backend,
            retention_days,
            last_sweep: None,
            total_deleted: 0,
        }
    }

    /// Delete everything older than the retention window, measured from now
    pub async fn sweep(&mut self) -> Option<CleanupCounts> {
        self.sweep_at(Utc::now()).await
    }

    /// Delete everything older than the retention window, measured from `now`
    ///
    /// Errors are logged and reported as `None`; the next sweep simply tries again.
    #[instrument(skip(self), fields(retention_days = self.retention_days))]
    pub async fn sweep_at(&mut self, now: DateTime<Utc>) -> Option<CleanupCounts> {
        let cutoff = now - Duration::days(i64::from(self.retention_days));

        match self.backend.cleanup_before(cutoff).await {
            Ok(counts) => {
                self.last_sweep = Some(now);
                self.total_deleted += counts.total() as u64;

                if counts.total() > 0 {
                    info!(
                        "retention sweep removed {} readings and {} alerts older than {}",
                        counts.readings, counts.alerts, cutoff
                    );
                } else {
                    trace!("retention sweep: nothing older than {cutoff}");
                }
                Some(counts)
            }
            Err(e) => {
                error!("retention sweep failed: {e}");
                None
            }
        }
    }

    pub fn last_sweep(&self) -> Option<DateTime<Utc>> {
        self.last_sweep
    }

    /// Rows deleted since this sweeper was created
    pub fn total_deleted(&self) -> u64 {
        self.total_deleted
    }
}
