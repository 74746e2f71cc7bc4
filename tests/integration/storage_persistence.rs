//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Readings and alerts survive reopening the database
//! - Concurrent writers do not lose rows
//! - Retention cleanup through the sweeper removes only expired rows

use std::sync::Arc;

use agri_monitor::SensorFields;
use agri_monitor::retention::RetentionSweeper;
use agri_monitor::storage::sqlite::SqliteBackend;
use agri_monitor::storage::{Alert, Severity, StorageBackend};
use chrono::{Duration, Utc};
use tempfile::tempdir;

use crate::helpers::create_test_reading;

fn fields(temperature: f64) -> SensorFields {
    SensorFields {
        temperature: Some(temperature),
        humidity: Some(55.0),
        ..SensorFields::default()
    }
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("persist.db");
    let now = Utc::now();

    {
        let backend = SqliteBackend::new(&db_path).await.unwrap();
        backend
            .insert_reading(&create_test_reading("dev1", now, fields(18.5)))
            .await
            .unwrap();
        let id = backend
            .insert_alert(&Alert::threshold(
                "dev1",
                now,
                Severity::Warning,
                "temperature outside optimal range: 36°C",
            ))
            .await
            .unwrap();
        backend.acknowledge_alert(id).await.unwrap();
        backend.close().await.unwrap();
    }

    let backend = SqliteBackend::new(&db_path).await.unwrap();

    let readings = backend.query_latest(Some("dev1"), 10).await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].fields.temperature, Some(18.5));
    assert_eq!(readings[0].fields.humidity, Some(55.0));
    assert_eq!(
        readings[0].timestamp.timestamp_millis(),
        now.timestamp_millis()
    );

    // Acknowledgement is persisted too
    assert!(backend.query_active_alerts(10).await.unwrap().is_empty());

    let stats = backend.statistics().await.unwrap();
    assert_eq!(stats.total_readings, 1);
    assert_eq!(stats.active_alerts, 0);
}

#[tokio::test]
async fn test_concurrent_writers() {
    let dir = tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(dir.path().join("concurrent.db")).await.unwrap());

    let mut tasks = Vec::new();
    for device in 0..4 {
        let backend = backend.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                let reading = create_test_reading(
                    &format!("dev{device}"),
                    Utc::now(),
                    fields(15.0 + i as f64 * 0.1),
                );
                backend.insert_reading(&reading).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = backend.statistics().await.unwrap();
    assert_eq!(stats.total_readings, 100);
    assert_eq!(stats.unique_devices, 4);

    let latest = backend
        .query_latest_per_device(Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    let devices: Vec<_> = latest.iter().map(|r| r.device_id.as_str()).collect();
    assert_eq!(devices, vec!["dev0", "dev1", "dev2", "dev3"]);
}

#[tokio::test]
async fn test_retention_through_sweeper() {
    let dir = tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(dir.path().join("retention.db")).await.unwrap());
    let now = Utc::now();

    for days in [45, 31, 29, 1] {
        backend
            .insert_reading(&create_test_reading(
                &format!("dev-{days}"),
                now - Duration::days(days),
                fields(20.0),
            ))
            .await
            .unwrap();
    }

    let mut sweeper = RetentionSweeper::new(backend.clone(), 30);
    let counts = sweeper.sweep_at(now).await.unwrap();
    assert_eq!(counts.readings, 2);

    // A second sweep finds nothing new
    let counts = sweeper.sweep_at(now).await.unwrap();
    assert_eq!(counts.total(), 0);
    assert_eq!(sweeper.total_deleted(), 2);

    let mut remaining: Vec<_> = backend
        .query_latest(None, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.device_id)
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec!["dev-1".to_string(), "dev-29".to_string()]);
}
