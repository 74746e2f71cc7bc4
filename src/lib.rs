pub mod actors;
pub mod alerts;
pub mod config;
pub mod export;
pub mod manager;
pub mod queue;
pub mod retention;
pub mod storage;
pub mod util;
pub mod validation;

use serde::{Deserialize, Serialize};

/// Normalized measurements of a single sensor reading.
///
/// Every field is optional: a value that was absent from the payload or that failed
/// validation is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFields {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub ph_level: Option<f64>,
    pub light_intensity: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
}

impl SensorFields {
    /// Number of recognized fields a reading can carry
    pub const COUNT: usize = 9;

    /// All fields in storage order, paired with their column name
    pub fn entries(&self) -> [(&'static str, Option<f64>); Self::COUNT] {
        [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("soil_moisture", self.soil_moisture),
            ("ph_level", self.ph_level),
            ("light_intensity", self.light_intensity),
            ("latitude", self.latitude),
            ("longitude", self.longitude),
            ("battery_level", self.battery_level),
            ("signal_strength", self.signal_strength),
        ]
    }

    pub fn present_count(&self) -> usize {
        self.entries().iter().filter(|(_, v)| v.is_some()).count()
    }
}

