//! BrokerActor - MQTT session and subscription management
//!
//! The actor owns the rumqttc event loop. Its only job on the hot path is to turn
//! every incoming publish into an [`InboundMessage`] and hand it to the ingestion
//! queue without waiting; parsing and storage happen in the processor.
//!
//! ## Connection lifecycle
//!
//! ```text
//!  connect() ──► Connecting ──ConnAck──► Connected ──error──► Disconnected
//!                   │                       ▲                     │
//!                   │ error/timeout         └──────ConnAck────────┘
//!                   ▼                          (backoff between polls)
//!                 Failed (returned to the caller, not retried)
//! ```
//!
//! Subscriptions are re-issued on every ConnAck since the session is clean.

use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use super::backoff::Backoff;
use super::messages::{BrokerCommand, ConnectionStatus, RuntimeStats};
use crate::config::Config;
use crate::queue::{InboundMessage, QueueSender};

/// Requests the client may queue before `try_*` calls start failing
const CLIENT_REQUEST_CAPACITY: usize = 16;

/// How long a shutdown waits for the DISCONNECT packet to go out
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub struct BrokerActor {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Vec<String>,
    queue: QueueSender,
    stats: RuntimeStats,
    backoff: Backoff,
    command_rx: mpsc::Receiver<BrokerCommand>,
}

enum Flow {
    Continue,
    Stop,
}

impl BrokerActor {
    /// Run the actor's main loop
    #[instrument(skip(self), fields(topics = ?self.topics))]
    pub async fn run(mut self) {
        debug!("starting broker actor");

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    let flow = match event {
                        Ok(event) => {
                            self.handle_event(event);
                            Flow::Continue
                        }
                        Err(e) => self.handle_connection_error(e).await,
                    };
                    if let Flow::Stop = flow {
                        break;
                    }
                }

                cmd = self.command_rx.recv() => {
                    self.handle_command(cmd).await;
                    break;
                }
            }
        }

        debug!("broker actor stopped");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                trace!("received message on {}", message.topic);
                self.stats.record_received(message.received_at);
                self.queue.enqueue(message);
            }
            Event::Incoming(Packet::ConnAck(_)) => {
                info!("reconnected to MQTT broker");
                self.backoff.reset();
                subscribe_all(&self.client, &self.topics);
                self.stats.set_status(ConnectionStatus::Connected);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("broker closed the session");
                self.stats.set_status(ConnectionStatus::Disconnected);
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                trace!("subscription acknowledged: {:?}", ack.return_codes);
            }
            _ => {}
        }
    }

    /// Wait out the backoff delay, still listening for commands
    async fn handle_connection_error(&mut self, err: ConnectionError) -> Flow {
        self.stats.set_status(ConnectionStatus::Disconnected);
        let delay = self.backoff.next_delay();
        warn!(
            "connection to MQTT broker lost: {err}, retrying in {:.1}s (attempt {})",
            delay.as_secs_f64(),
            self.backoff.attempt()
        );

        tokio::select! {
            _ = time::sleep(delay) => Flow::Continue,
            cmd = self.command_rx.recv() => {
                self.handle_command(cmd).await;
                Flow::Stop
            }
        }
    }

    /// Every command stops the actor; a closed channel counts as a shutdown request
    async fn handle_command(&mut self, cmd: Option<BrokerCommand>) {
        match cmd {
            Some(BrokerCommand::Shutdown { respond_to }) => {
                self.disconnect().await;
                let _ = respond_to.send(());
            }
            None => {
                warn!("command channel closed, disconnecting");
                self.disconnect().await;
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.stats.status() != ConnectionStatus::Connected {
            self.stats.set_status(ConnectionStatus::Disconnected);
            return;
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("failed to request disconnect: {e}");
        }

        let eventloop = &mut self.eventloop;
        let flushed = time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            debug!("disconnect was not flushed within {DISCONNECT_FLUSH_TIMEOUT:?}");
        }

        self.stats.set_status(ConnectionStatus::Disconnected);
        info!("disconnected from MQTT broker");
    }
}

fn subscribe_all(client: &AsyncClient, topics: &[String]) {
    for topic in topics {
        match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            Ok(()) => info!("subscribed to {topic}"),
            Err(e) => error!("failed to subscribe to {topic}: {e}"),
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Handle for controlling a BrokerActor
#[derive(Clone)]
pub struct BrokerHandle {
    sender: mpsc::Sender<BrokerCommand>,
}

impl BrokerHandle {
    /// Connect to the broker, subscribe, and spawn the actor
    ///
    /// The first connection attempt is bounded by the configured connect timeout.
    /// If it fails the status becomes `Failed` and the error is returned; later
    /// connection losses are retried by the actor with exponential backoff.
    #[instrument(skip_all, fields(broker = %config.mqtt_broker, port = config.mqtt_port))]
    pub async fn connect(config: &Config, queue: QueueSender, stats: RuntimeStats) -> Result<Self> {
        stats.set_status(ConnectionStatus::Connecting);

        let mut options = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_broker.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);

        let capacity = CLIENT_REQUEST_CAPACITY.max(config.mqtt_topics.len() * 2);
        let (client, mut eventloop) = AsyncClient::new(options, capacity);

        let connected = time::timeout(config.connect_timeout(), wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "no acknowledgement within {}s",
                    config.connect_timeout().as_secs_f64()
                )
            })
            .and_then(|result| result.map_err(anyhow::Error::from));

        if let Err(e) = connected {
            stats.set_status(ConnectionStatus::Failed);
            error!("failed to connect to MQTT broker: {e}");
            return Err(e).with_context(|| {
                format!(
                    "failed to connect to MQTT broker at {}:{}",
                    config.mqtt_broker, config.mqtt_port
                )
            });
        }

        info!(
            "connected to MQTT broker at {}:{}",
            config.mqtt_broker, config.mqtt_port
        );
        subscribe_all(&client, &config.mqtt_topics);
        stats.set_status(ConnectionStatus::Connected);

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = BrokerActor {
            client,
            eventloop,
            topics: config.mqtt_topics.clone(),
            queue,
            stats,
            backoff: Backoff::from_secs_f64(
                config.reconnect_initial_delay_secs,
                config.reconnect_max_delay_secs,
            ),
            command_rx: cmd_rx,
        };

        tokio::spawn(actor.run());

        Ok(Self { sender: cmd_tx })
    }

    /// Disconnect from the broker and wait for the actor to stop
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BrokerCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive response")?;
        Ok(())
    }
}
