use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, ensure};
use tracing::trace;

/// Runtime configuration of the ingestion service
///
/// Loaded once at startup and never changed afterwards. The JSON keys match the flat
/// configuration file used by existing deployments; every key is optional.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hostname of the MQTT broker
    pub mqtt_broker: String,

    pub mqtt_port: u16,

    /// Topic filters to subscribe to (`+` matches exactly one level)
    pub mqtt_topics: Vec<String>,

    /// MQTT client identifier (generated from the start time if not configured)
    pub mqtt_client_id: String,

    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Rolling CSV export of the last 24 hours
    pub csv_export_path: PathBuf,

    /// Latest reading per device, consumed by the analysis engine
    pub json_export_path: PathBuf,

    /// Readings and alerts older than this are deleted
    pub data_retention_days: u32,

    /// Seconds between two processing ticks
    pub processing_interval: f64,

    /// Seconds between two snapshot exports
    pub csv_update_interval: f64,

    /// Capacity of the ingestion queue between the MQTT event loop and the processor
    pub queue_capacity: usize,

    pub keep_alive_secs: u64,

    pub connect_timeout_secs: u64,

    pub reconnect_initial_delay_secs: f64,

    pub reconnect_max_delay_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt_broker: default_mqtt_broker(),
            mqtt_port: default_mqtt_port(),
            mqtt_topics: default_mqtt_topics(),
            mqtt_client_id: crate::util::generate_client_id(),
            database_path: default_database_path(),
            csv_export_path: default_csv_export_path(),
            json_export_path: default_json_export_path(),
            data_retention_days: default_retention_days(),
            processing_interval: default_processing_interval(),
            csv_update_interval: default_export_interval(),
            queue_capacity: default_queue_capacity(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_initial_delay_secs: default_reconnect_initial_delay(),
            reconnect_max_delay_secs: default_reconnect_max_delay(),
        }
    }
}

fn default_mqtt_broker() -> String {
    "broker.hivemq.com".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topics() -> Vec<String> {
    vec!["agri/sensors/+/data".to_string()]
}

fn default_database_path() -> PathBuf {
    PathBuf::from("iot_sensor_data.db")
}

fn default_csv_export_path() -> PathBuf {
    PathBuf::from("live_sensor_data.csv")
}

fn default_json_export_path() -> PathBuf {
    PathBuf::from("latest_sensor_data.json")
}

fn default_retention_days() -> u32 {
    30
}

fn default_processing_interval() -> f64 {
    1.0
}

fn default_export_interval() -> f64 {
    10.0
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_initial_delay() -> f64 {
    1.0
}

fn default_reconnect_max_delay() -> f64 {
    60.0
}

impl Config {
    /// Check the option combinations the runtime cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.mqtt_broker.is_empty(), "mqtt_broker must not be empty");
        ensure!(
            !self.mqtt_client_id.is_empty(),
            "mqtt_client_id must not be empty"
        );
        ensure!(
            !self.mqtt_topics.is_empty(),
            "at least one topic in mqtt_topics is required"
        );

        for topic in &self.mqtt_topics {
            if !rumqttc::valid_filter(topic) {
                bail!("invalid topic filter: {topic:?}");
            }
        }

        ensure!(self.queue_capacity > 0, "queue_capacity must be positive");
        ensure!(
            self.data_retention_days > 0,
            "data_retention_days must be positive"
        );

        for (name, secs) in [
            ("processing_interval", self.processing_interval),
            ("csv_update_interval", self.csv_update_interval),
            (
                "reconnect_initial_delay_secs",
                self.reconnect_initial_delay_secs,
            ),
            ("reconnect_max_delay_secs", self.reconnect_max_delay_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                bail!("{name} must be a positive number of seconds, got {secs}");
            }
            if Duration::try_from_secs_f64(secs).is_err() {
                bail!("{name} is too large to be used as a duration, got {secs}");
            }
        }

        ensure!(
            self.reconnect_max_delay_secs >= self.reconnect_initial_delay_secs,
            "reconnect_max_delay_secs must not be smaller than reconnect_initial_delay_secs"
        );
        ensure!(
            self.keep_alive_secs >= 5,
            "keep_alive_secs must be at least 5 seconds"
        );
        ensure!(
            self.connect_timeout_secs > 0,
            "connect_timeout_secs must be positive"
        );

        Ok(())
    }

    pub fn processing_interval(&self) -> Duration {
        Duration::from_secs_f64(self.processing_interval)
    }

    pub fn export_interval(&self) -> Duration {
        Duration::from_secs_f64(self.csv_update_interval)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
