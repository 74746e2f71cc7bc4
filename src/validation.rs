//! Range validation and normalization of raw sensor payloads
//!
//! Each recognized measurement is checked against an inclusive range. A value that is
//! present but outside its range (or not a number) is replaced by `None`; the sibling
//! fields are unaffected. The nested `location: {lat, lon}` block is flattened into
//! `latitude`/`longitude`.
//!
//! The quality score is the fraction of recognized fields that survived validation.

use serde_json::{Map, Value};
use tracing::warn;

use crate::SensorFields;

/// Inclusive valid range for a measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

pub const TEMPERATURE_RANGE: Range = Range::new(-50.0, 60.0);
pub const HUMIDITY_RANGE: Range = Range::new(0.0, 100.0);
pub const SOIL_MOISTURE_RANGE: Range = Range::new(0.0, 100.0);
pub const PH_LEVEL_RANGE: Range = Range::new(0.0, 14.0);
pub const LIGHT_INTENSITY_RANGE: Range = Range::new(0.0, 2000.0);
pub const BATTERY_LEVEL_RANGE: Range = Range::new(0.0, 100.0);
pub const SIGNAL_STRENGTH_RANGE: Range = Range::new(-120.0, 0.0);

/// Result of validating one payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Validation {
    pub fields: SensorFields,

    /// Fraction of recognized fields that are present and valid, always in `[0, 1]`
    pub data_quality: f64,
}

/// Validate the fields of a decoded JSON payload
pub fn validate(data: &Map<String, Value>) -> Validation {
    let (latitude, longitude) = location(data);

    let fields = SensorFields {
        temperature: ranged(data, "temperature", TEMPERATURE_RANGE),
        humidity: ranged(data, "humidity", HUMIDITY_RANGE),
        soil_moisture: ranged(data, "soil_moisture", SOIL_MOISTURE_RANGE),
        ph_level: ranged(data, "ph_level", PH_LEVEL_RANGE),
        light_intensity: ranged(data, "light_intensity", LIGHT_INTENSITY_RANGE),
        latitude,
        longitude,
        battery_level: ranged(data, "battery_level", BATTERY_LEVEL_RANGE),
        signal_strength: ranged(data, "signal_strength", SIGNAL_STRENGTH_RANGE),
    };

    Validation {
        data_quality: quality_score(&fields),
        fields,
    }
}

pub fn quality_score(fields: &SensorFields) -> f64 {
    fields.present_count() as f64 / SensorFields::COUNT as f64
}

fn ranged(data: &Map<String, Value>, field: &str, range: Range) -> Option<f64> {
    let value = data.get(field)?;
    if value.is_null() {
        return None;
    }

    let Some(number) = as_number(value) else {
        warn!("non-numeric value for {field}: {value}");
        return None;
    };

    if !range.contains(number) {
        warn!(
            "value out of range for {field}: {number} (expected {}..={})",
            range.min, range.max
        );
        return None;
    }

    Some(number)
}

fn location(data: &Map<String, Value>) -> (Option<f64>, Option<f64>) {
    let Some(Value::Object(location)) = data.get("location") else {
        return (None, None);
    };

    let coordinate = |key: &str| location.get(key).and_then(as_number);
    (coordinate("lat"), coordinate("lon"))
}

/// Numbers and numeric strings are accepted, anything else is not a measurement
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}
