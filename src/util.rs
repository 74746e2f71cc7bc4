use chrono::Utc;

/// Device identifier used when the topic carries none
pub const UNKNOWN_DEVICE: &str = "unknown";

const CLIENT_ID_PREFIX: &str = "agri_monitor_";

/// Client identifier derived from the current Unix time
pub fn generate_client_id() -> String {
    format!("{CLIENT_ID_PREFIX}{}", Utc::now().timestamp())
}

/// Extract the device identifier from a topic like `agri/sensors/{device_id}/data`
///
/// The device is the third topic level. Topics with fewer levels, or with an empty third
/// level, map to [`UNKNOWN_DEVICE`].
pub fn device_id_from_topic(topic: &str) -> &str {
    match topic.split('/').nth(2) {
        Some(device) if !device.is_empty() => device,
        _ => UNKNOWN_DEVICE,
    }
}
