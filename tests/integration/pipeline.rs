//! End-to-end tests: broker publish to stored reading, alert and export files

use agri_monitor::actors::messages::ConnectionStatus;
use agri_monitor::manager::IngestManager;
use agri_monitor::storage::Severity;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::{FakeBroker, test_config, wait_until};

#[tokio::test]
async fn test_cold_reading_flows_through_pipeline() {
    let broker = FakeBroker::start().await;
    let dir = tempdir().unwrap();
    let mut manager = IngestManager::new(test_config(&dir, broker.port)).await.unwrap();

    manager.start().await.unwrap();
    assert_eq!(manager.connection_status(), ConnectionStatus::Connected);
    broker.wait_for_subscriptions(1).await;
    assert_eq!(broker.subscriptions(), vec!["agri/sensors/+/data".to_string()]);

    let payload = r#"{"temperature": 2, "humidity": 50, "soil_moisture": 40, "ph_level": 6.5}"#;
    broker.publish("agri/sensors/dev1/data", payload.as_bytes());

    let m = &manager;
    let stored = wait_until(move || async move {
        m.process_now().await.unwrap();
        m.get_latest(Some("dev1")).await.unwrap().len() == 1
    })
    .await;
    assert!(stored, "reading was never stored");

    let readings = manager.get_latest(Some("dev1")).await.unwrap();
    assert_eq!(readings[0].fields.temperature, Some(2.0));
    assert_eq!(readings[0].fields.humidity, Some(50.0));
    assert_eq!(readings[0].fields.soil_moisture, Some(40.0));
    assert_eq!(readings[0].fields.ph_level, Some(6.5));
    assert_eq!(readings[0].raw_payload, payload);
    assert!((readings[0].data_quality - 4.0 / 9.0).abs() < 1e-9);

    // Only the temperature is outside its band
    let alerts = manager.get_active_alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert_eq!(alerts[0].device_id, "dev1");
    assert!(alerts[0].message.contains("temperature"));
    assert!(alerts[0].message.contains('2'));

    // The first export follows one 0.1s interval after start
    let csv_path = dir.path().join("live_sensor_data.csv");
    let json_path = dir.path().join("latest_sensor_data.json");
    let (csv, json) = (&csv_path, &json_path);
    let exported = wait_until(move || async move {
        m.process_now().await.unwrap();
        csv.exists() && json.exists()
    })
    .await;
    assert!(exported, "export files were never written");

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), 2);

    let json = std::fs::read_to_string(&json_path).unwrap();
    assert_eq!(json.matches(r#""device_id""#).count(), 1);
    assert!(json.contains(r#""device_id": "dev1""#));
    assert!(json.contains(r#""temperature": 2.0"#));
    assert!(json.contains(r#""ph": 6.5"#));
    assert!(json.contains("NaN"));

    let stats = manager.get_statistics().await.unwrap();
    assert_eq!(stats.messages_received, 1);
    assert_eq!(stats.messages_processed, 1);
    assert_eq!(stats.total_readings, 1);
    assert_eq!(stats.active_alerts, 1);
    assert!(stats.last_message_time.is_some());

    manager.stop().await.unwrap();
    assert!(!manager.is_running());
    assert_eq!(manager.connection_status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_invalid_fields_are_stored_as_missing() {
    let broker = FakeBroker::start().await;
    let dir = tempdir().unwrap();
    let mut manager = IngestManager::new(test_config(&dir, broker.port)).await.unwrap();
    manager.start().await.unwrap();
    broker.wait_for_subscriptions(1).await;

    broker.publish(
        "agri/sensors/field-7/data",
        br#"{"temperature": 150, "humidity": 45.5, "location": {"lat": 52.1, "lon": 4.3}}"#,
    );
    broker.publish("agri/sensors/field-7/data", b"not json at all");

    let m = &manager;
    let done = wait_until(move || async move {
        m.process_now().await.unwrap();
        let stats = m.get_statistics().await.unwrap();
        stats.messages_processed + stats.processing_errors == 2
    })
    .await;
    assert!(done, "messages were never processed");

    let readings = manager.get_latest(Some("field-7")).await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].fields.temperature, None);
    assert_eq!(readings[0].fields.humidity, Some(45.5));
    assert_eq!(readings[0].fields.latitude, Some(52.1));
    assert_eq!(readings[0].fields.longitude, Some(4.3));
    assert!((readings[0].data_quality - 3.0 / 9.0).abs() < 1e-9);

    // An out-of-range temperature raises nothing
    assert!(manager.get_active_alerts().await.unwrap().is_empty());

    let stats = manager.get_statistics().await.unwrap();
    assert_eq!(stats.processing_errors, 1);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_acknowledged_alert_leaves_active_list() {
    let broker = FakeBroker::start().await;
    let dir = tempdir().unwrap();
    let mut manager = IngestManager::new(test_config(&dir, broker.port)).await.unwrap();
    manager.start().await.unwrap();
    broker.wait_for_subscriptions(1).await;

    broker.publish(
        "agri/sensors/dev2/data",
        br#"{"soil_moisture": 12, "battery_level": 15}"#,
    );

    let m = &manager;
    let raised = wait_until(move || async move {
        m.process_now().await.unwrap();
        m.get_active_alerts().await.unwrap().len() == 2
    })
    .await;
    assert!(raised, "alerts were never raised");

    let alerts = manager.get_active_alerts().await.unwrap();
    let id = alerts[0].id.unwrap();
    assert!(manager.acknowledge(id).await.unwrap());
    assert!(manager.acknowledge(id).await.unwrap());

    let remaining = manager.get_active_alerts().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].id, Some(id));

    manager.stop().await.unwrap();
}
