//! Threshold rules for sensor readings
//!
//! Every reading is evaluated on its own: there is no state carried between two
//! readings of the same device, so a sensor that stays out of range raises an alert
//! with every reading it sends.
//!
//! | Field         | Critical        | Warning                |
//! |---------------|-----------------|------------------------|
//! | temperature   | < 5 or > 40     | [5, 10) or (35, 40]    |
//! | soil_moisture | < 20            | [20, 30) or > 80       |
//! | ph_level      |                 | < 5.5 or > 8.0         |
//! | battery_level | < 10            | [10, 20)               |

use tracing::{info, instrument};

use crate::storage::schema::{Alert, SensorReading, Severity};

/// Stateless rule evaluation
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertEngine;

impl AlertEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate all rules against one reading
    ///
    /// Each matching rule yields one alert; a reading can raise several alerts at once.
    #[instrument(skip_all, fields(device_id = %reading.device_id))]
    pub fn evaluate(&self, reading: &SensorReading) -> Vec<Alert> {
        let fields = &reading.fields;

        let alerts: Vec<Alert> = [
            fields.temperature.and_then(temperature_rule),
            fields.soil_moisture.and_then(soil_moisture_rule),
            fields.ph_level.and_then(ph_level_rule),
            fields.battery_level.and_then(battery_level_rule),
        ]
        .into_iter()
        .flatten()
        .map(|(severity, message)| {
            Alert::threshold(&reading.device_id, reading.timestamp, severity, message)
        })
        .collect();

        for alert in &alerts {
            info!(
                "alert for {}: {} - {}",
                alert.device_id, alert.severity, alert.message
            );
        }

        alerts
    }
}

fn temperature_rule(value: f64) -> Option<(Severity, String)> {
    if value < 5.0 {
        Some((
            Severity::Critical,
            format!("temperature critically low: {value}°C"),
        ))
    } else if value > 40.0 {
        Some((
            Severity::Critical,
            format!("temperature critically high: {value}°C"),
        ))
    } else if value < 10.0 || value > 35.0 {
        Some((
            Severity::Warning,
            format!("temperature outside optimal range: {value}°C"),
        ))
    } else {
        None
    }
}

fn soil_moisture_rule(value: f64) -> Option<(Severity, String)> {
    if value < 20.0 {
        Some((
            Severity::Critical,
            format!("soil_moisture critically low: {value}%"),
        ))
    } else if value < 30.0 {
        Some((Severity::Warning, format!("soil_moisture low: {value}%")))
    } else if value > 80.0 {
        Some((Severity::Warning, format!("soil_moisture high: {value}%")))
    } else {
        None
    }
}

fn ph_level_rule(value: f64) -> Option<(Severity, String)> {
    if value < 5.5 || value > 8.0 {
        Some((
            Severity::Warning,
            format!("ph_level outside optimal range: {value}"),
        ))
    } else {
        None
    }
}

fn battery_level_rule(value: f64) -> Option<(Severity, String)> {
    if value < 10.0 {
        Some((
            Severity::Critical,
            format!("battery_level critically low: {value}%"),
        ))
    } else if value < 20.0 {
        Some((Severity::Warning, format!("battery_level low: {value}%")))
    } else {
        None
    }
}
