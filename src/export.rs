//! Snapshot exports for the analysis engine and dashboards
//!
//! Two files are rewritten on every export tick:
//!
//! - a CSV file with the readings of the last 24 hours (newest first, at most 1000 rows)
//! - a JSON file with the newest reading of every device seen in the last hour
//!
//! Consumers poll these files on their own schedule. Each file is written to a
//! temporary sibling and renamed into place, so a reader never sees a partial file.
//! When a query returns no rows the previous snapshot is left untouched.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use tracing::{debug, error, instrument};

use crate::storage::{SensorReading, StorageBackend};

/// How far back the CSV export reaches
pub const CSV_WINDOW_HOURS: i64 = 24;

/// Maximum number of rows in the CSV export
pub const CSV_ROW_LIMIT: usize = 1000;

/// How far back a device's latest reading may be to appear in the JSON export
pub const LATEST_WINDOW_HOURS: i64 = 1;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of one export run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Rows written to the CSV file, `None` if the file was not rewritten
    pub csv_rows: Option<usize>,

    /// Devices written to the JSON file, `None` if the file was not rewritten
    pub json_devices: Option<usize>,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    device_id: &'a str,
    temperature: Option<f64>,
    humidity: Option<f64>,
    soil_moisture: Option<f64>,
    ph_level: Option<f64>,
    light_intensity: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    data_quality: f64,
}

impl<'a> From<&'a SensorReading> for CsvRow<'a> {
    fn from(reading: &'a SensorReading) -> Self {
        let fields = &reading.fields;
        Self {
            timestamp: reading.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            device_id: &reading.device_id,
            temperature: fields.temperature,
            humidity: fields.humidity,
            soil_moisture: fields.soil_moisture,
            ph_level: fields.ph_level,
            light_intensity: fields.light_intensity,
            latitude: fields.latitude,
            longitude: fields.longitude,
            data_quality: reading.data_quality,
        }
    }
}

#[derive(Debug, Serialize)]
struct LatestSnapshot<'a> {
    timestamp: String,
    devices: Vec<LatestDevice<'a>>,
}

/// Every `None` here ends up as `NaN` in the written file.
#[derive(Debug, Serialize)]
struct LatestDevice<'a> {
    device_id: &'a str,
    temperature: Option<f64>,
    humidity: Option<f64>,
    soil_moisture: Option<f64>,
    #[serde(rename = "ph")]
    ph_level: Option<f64>,
    light_intensity: Option<f64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    data_quality: f64,
}

impl<'a> From<&'a SensorReading> for LatestDevice<'a> {
    fn from(reading: &'a SensorReading) -> Self {
        let fields = &reading.fields;
        Self {
            device_id: &reading.device_id,
            temperature: fields.temperature,
            humidity: fields.humidity,
            soil_moisture: fields.soil_moisture,
            ph_level: fields.ph_level,
            light_intensity: fields.light_intensity,
            latitude: fields.latitude,
            longitude: fields.longitude,
            data_quality: reading.data_quality,
        }
    }
}

/// Pretty-printing JSON formatter that writes missing numbers as `NaN`
///
/// The snapshot contains no nulls other than missing measurements, and the analysis
/// engine reads `NaN` as a missing numeric value.
struct NanFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl NanFormatter<'_> {
    fn new() -> Self {
        Self {
            inner: PrettyFormatter::with_indent(b"  "),
        }
    }
}

impl Formatter for NanFormatter<'_> {
    fn write_null<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b"NaN")
    }

    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }
}

/// Writes the CSV and JSON snapshots from the store
pub struct Exporter {
    backend: Arc<dyn StorageBackend>,
    csv_path: PathBuf,
    json_path: PathBuf,
}

impl Exporter {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        csv_path: impl Into<PathBuf>,
        json_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            csv_path: csv_path.into(),
            json_path: json_path.into(),
        }
    }

    /// Run both exports
    ///
    /// The two writers are independent: a failure in one is logged and does not keep
    /// the other from running.
    #[instrument(skip(self))]
    pub async fn export_all(&self) -> ExportSummary {
        let now = Utc::now();

        let csv_rows = match self.export_csv(now).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("CSV export failed: {e:#}");
                None
            }
        };

        let json_devices = match self.export_latest_json(now).await {
            Ok(devices) => devices,
            Err(e) => {
                error!("JSON export failed: {e:#}");
                None
            }
        };

        ExportSummary {
            csv_rows,
            json_devices,
        }
    }

    /// Rewrite the CSV file with the readings of the last 24 hours
    pub async fn export_csv(&self, now: DateTime<Utc>) -> anyhow::Result<Option<usize>> {
        let readings = self
            .backend
            .query_since(now - Duration::hours(CSV_WINDOW_HOURS), CSV_ROW_LIMIT)
            .await
            .context("failed to query readings for CSV export")?;

        if readings.is_empty() {
            debug!("no readings in the last {CSV_WINDOW_HOURS}h, CSV export skipped");
            return Ok(None);
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        for reading in &readings {
            writer.serialize(CsvRow::from(reading))?;
        }
        let content = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to finish CSV output: {e}"))?;

        write_atomically(&self.csv_path, &content).await?;

        debug!("CSV export updated: {} records", readings.len());
        Ok(Some(readings.len()))
    }

    /// Rewrite the JSON file with the newest reading of every recently seen device
    pub async fn export_latest_json(&self, now: DateTime<Utc>) -> anyhow::Result<Option<usize>> {
        let readings = self
            .backend
            .query_latest_per_device(now - Duration::hours(LATEST_WINDOW_HOURS))
            .await
            .context("failed to query latest readings for JSON export")?;

        if readings.is_empty() {
            debug!("no device reported in the last {LATEST_WINDOW_HOURS}h, JSON export skipped");
            return Ok(None);
        }

        let snapshot = LatestSnapshot {
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            devices: readings.iter().map(LatestDevice::from).collect(),
        };

        let mut content = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(&mut content, NanFormatter::new());
        snapshot.serialize(&mut serializer)?;

        write_atomically(&self.json_path, &content).await?;

        debug!("JSON export updated: {} devices", readings.len());
        Ok(Some(readings.len()))
    }
}

async fn write_atomically(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, content)
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("failed to move export into place at {}", path.display()))?;

    Ok(())
}
