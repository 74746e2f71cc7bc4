//! Integration tests for failure scenarios
//!
//! These tests verify that:
//! - An unreachable broker fails startup instead of hanging
//! - A lost connection is re-established and subscriptions are re-issued
//! - A full ingestion queue drops messages without stalling the broker actor

use agri_monitor::actors::messages::ConnectionStatus;
use agri_monitor::config::Config;
use agri_monitor::manager::IngestManager;
use tempfile::tempdir;

use crate::helpers::{FakeBroker, test_config, wait_until};

#[tokio::test]
async fn test_unreachable_broker_fails_startup() {
    let dir = tempdir().unwrap();
    let config = Config {
        mqtt_port: 1,
        ..test_config(&dir, 1)
    };
    let mut manager = IngestManager::new(config).await.unwrap();

    let err = manager.start().await.unwrap_err();

    assert!(format!("{err:#}").contains("127.0.0.1:1"));
    assert_eq!(manager.connection_status(), ConnectionStatus::Failed);
    assert!(!manager.is_running());

    // The store is still usable for collaborators
    let stats = manager.get_statistics().await.unwrap();
    assert_eq!(stats.total_readings, 0);
    assert_eq!(stats.connection_status, ConnectionStatus::Failed);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let broker = FakeBroker::start().await;
    let dir = tempdir().unwrap();
    let mut manager = IngestManager::new(test_config(&dir, broker.port)).await.unwrap();

    manager.start().await.unwrap();
    assert!(manager.start().await.is_err());
    assert_eq!(broker.connections(), 1);

    manager.stop().await.unwrap();
    // Stopping again is a no-op
    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_and_resubscribes_after_connection_loss() {
    let broker = FakeBroker::start().await;
    let dir = tempdir().unwrap();
    let mut manager = IngestManager::new(test_config(&dir, broker.port)).await.unwrap();
    manager.start().await.unwrap();
    broker.wait_for_subscriptions(1).await;

    broker.kick();

    // Initial backoff is 0.2s
    broker.wait_for_subscriptions(2).await;
    assert_eq!(broker.connections(), 2);

    let m = &manager;
    let connected =
        wait_until(move || async move { m.connection_status() == ConnectionStatus::Connected })
            .await;
    assert!(connected);

    broker.publish("agri/sensors/dev3/data", br#"{"humidity": 50}"#);
    let stored = wait_until(move || async move {
        m.process_now().await.unwrap();
        m.get_latest(Some("dev3")).await.unwrap().len() == 1
    })
    .await;
    assert!(stored, "no reading after reconnect");

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_full_queue_drops_excess_messages() {
    let broker = FakeBroker::start().await;
    let dir = tempdir().unwrap();
    let config = Config {
        queue_capacity: 2,
        processing_interval: 3600.0,
        ..test_config(&dir, broker.port)
    };
    let mut manager = IngestManager::new(config).await.unwrap();
    manager.start().await.unwrap();
    broker.wait_for_subscriptions(1).await;

    for i in 0..5 {
        broker.publish(
            "agri/sensors/burst/data",
            format!(r#"{{"temperature": {}}}"#, 20 + i).as_bytes(),
        );
    }

    let m = &manager;
    let received = wait_until(move || async move {
        m.get_statistics().await.unwrap().messages_received == 5
    })
    .await;
    assert!(received);

    m.process_now().await.unwrap();

    let stats = manager.get_statistics().await.unwrap();
    assert_eq!(stats.messages_dropped, 3);
    assert_eq!(stats.messages_processed, 2);
    assert_eq!(stats.total_readings, 2);

    // The oldest messages are the ones kept
    let readings = manager.get_latest(Some("burst")).await.unwrap();
    let mut temperatures: Vec<_> = readings.iter().filter_map(|r| r.fields.temperature).collect();
    temperatures.sort_by(f64::total_cmp);
    assert_eq!(temperatures, vec![20.0, 21.0]);

    manager.stop().await.unwrap();
}
