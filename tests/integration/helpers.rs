//! Helper functions for integration tests
//!
//! [`FakeBroker`] speaks just enough MQTT 3.1.1 for the client under test: it
//! acknowledges CONNECT, SUBSCRIBE and PINGREQ, records subscriptions, and forwards
//! QoS 0 publishes to every connected client.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agri_monitor::config::Config;
use agri_monitor::storage::SensorReading;
use agri_monitor::validation::Validation;
use agri_monitor::SensorFields;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

pub fn test_config(dir: &tempfile::TempDir, port: u16) -> Config {
    Config {
        mqtt_broker: "127.0.0.1".to_string(),
        mqtt_port: port,
        mqtt_client_id: "agri_monitor_test".to_string(),
        database_path: dir.path().join("iot_sensor_data.db"),
        csv_export_path: dir.path().join("live_sensor_data.csv"),
        json_export_path: dir.path().join("latest_sensor_data.json"),
        processing_interval: 0.1,
        csv_update_interval: 0.1,
        connect_timeout_secs: 2,
        reconnect_initial_delay_secs: 0.2,
        reconnect_max_delay_secs: 1.0,
        ..Config::default()
    }
}

pub fn create_test_reading(
    device_id: &str,
    timestamp: DateTime<Utc>,
    fields: SensorFields,
) -> SensorReading {
    SensorReading::new(
        device_id,
        timestamp,
        Validation {
            fields,
            data_quality: agri_monitor::validation::quality_score(&fields),
        },
        "{}",
    )
}

/// Poll `check` every 20ms until it returns true or 5 seconds pass
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[derive(Debug, Clone)]
enum Frame {
    Packet(Vec<u8>),
    Kick,
}

pub struct FakeBroker {
    pub port: u16,
    frames: broadcast::Sender<Frame>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (frames, _) = broadcast::channel(64);
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let broker = Self {
            port,
            frames: frames.clone(),
            subscriptions: subscriptions.clone(),
            connections: connections.clone(),
        };

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(
                    socket,
                    frames.subscribe(),
                    subscriptions.clone(),
                    connections.clone(),
                ));
            }
        });

        broker
    }

    /// Send a QoS 0 publish to every connected client
    pub fn publish(&self, topic: &str, payload: &[u8]) {
        let _ = self.frames.send(Frame::Packet(encode_publish(topic, payload)));
    }

    /// Drop every open connection without a DISCONNECT
    pub fn kick(&self) {
        let _ = self.frames.send(Frame::Kick);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub async fn wait_for_subscriptions(&self, count: usize) {
        let subscribed = wait_until(move || async move { self.subscriptions().len() >= count }).await;
        assert!(subscribed, "expected {count} subscriptions, got {:?}", self.subscriptions());
    }
}

async fn serve(
    socket: TcpStream,
    mut frames: broadcast::Receiver<Frame>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
) {
    let (mut reader, mut writer) = socket.into_split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let reader_task = tokio::spawn(async move {
        while let Ok((header, body)) = read_packet(&mut reader).await {
            let reply = match header >> 4 {
                // CONNECT
                1 => {
                    connections.fetch_add(1, Ordering::SeqCst);
                    vec![0x20, 0x02, 0x00, 0x00]
                }
                // SUBSCRIBE
                8 => {
                    let filters = parse_subscribe(&body);
                    let count = filters.len();
                    subscriptions.lock().unwrap().extend(filters);

                    let mut suback = vec![0x90, 2 + count as u8, body[0], body[1]];
                    suback.extend(std::iter::repeat_n(0x00, count));
                    suback
                }
                // PINGREQ
                12 => vec![0xd0, 0x00],
                // DISCONNECT
                14 => break,
                _ => continue,
            };
            if reply_tx.send(reply).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            reply = reply_rx.recv() => match reply {
                Some(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = frames.recv() => match frame {
                Ok(Frame::Packet(bytes)) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Ok(Frame::Kick) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }

    reader_task.abort();
}

async fn read_packet(reader: &mut OwnedReadHalf) -> std::io::Result<(u8, Vec<u8>)> {
    let header = reader.read_u8().await?;

    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await?;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

fn parse_subscribe(body: &[u8]) -> Vec<String> {
    let mut filters = Vec::new();
    let mut i = 2;
    while i + 2 <= body.len() {
        let len = u16::from_be_bytes([body[i], body[i + 1]]) as usize;
        let start = i + 2;
        filters.push(String::from_utf8_lossy(&body[start..start + len]).into_owned());
        // filter, then one QoS byte
        i = start + len + 1;
    }
    filters
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(payload);

    let mut packet = vec![0x30];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend(body);
    packet
}
