//! Row types for the `sensor_data` and `alerts` tables
//!
//! Timestamps are always UTC and are stored as Unix milliseconds. A reading keeps the
//! original payload text next to the normalized columns so that nothing the device sent
//! is lost, even for fields that failed validation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SensorFields;
use crate::validation::Validation;

/// The only alert type raised at the moment
pub const ALERT_TYPE_THRESHOLD: &str = "sensor_threshold";

/// A single validated reading from one device
///
/// `id` is `None` until the reading has been written. Readings are never updated after
/// they were inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: Option<i64>,

    /// When the reading was received
    pub timestamp: DateTime<Utc>,

    pub device_id: String,

    #[serde(flatten)]
    pub fields: SensorFields,

    /// Fraction of recognized fields that passed validation (0.0 to 1.0)
    pub data_quality: f64,

    /// The payload text exactly as it was received
    pub raw_payload: String,

    pub processed: bool,
}

impl SensorReading {
    pub fn new(
        device_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        validation: Validation,
        raw_payload: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            device_id: device_id.into(),
            fields: validation.fields,
            data_quality: validation.data_quality.clamp(0.0, 1.0),
            raw_payload: raw_payload.into(),
            processed: false,
        }
    }
}

/// Severity of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// An alert raised for a reading
///
/// The only mutation an alert ever sees is `acknowledged` going from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub acknowledged: bool,
}

impl Alert {
    /// A new, unacknowledged threshold alert
    pub fn threshold(
        device_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            device_id: device_id.into(),
            alert_type: ALERT_TYPE_THRESHOLD.to_string(),
            severity,
            message: message.into(),
            acknowledged: false,
        }
    }
}
