//! Ingestion queue between the MQTT event loop and the message processor
//!
//! A bounded tokio mpsc channel. The producer side never waits: when the queue is
//! full the message is dropped and counted, so the network path cannot be stalled by
//! a slow processor. The consumer drains everything that is queued once per tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

/// Default number of messages the queue can hold
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// A message as received from the broker, not yet parsed
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Create a new ingestion queue with the given capacity
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn ingestion_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    (
        QueueSender {
            tx,
            dropped: dropped.clone(),
        },
        QueueReceiver { rx },
    )
}

/// Producer side of the ingestion queue, cheap to clone
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<InboundMessage>,
    dropped: Arc<AtomicU64>,
}

impl QueueSender {
    /// Enqueue a message without waiting
    ///
    /// Returns `false` if the message was dropped because the queue is full or the
    /// processor is gone.
    pub fn enqueue(&self, message: InboundMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "ingestion queue full, dropping message on {}",
                    message.topic
                );
                false
            }
            Err(TrySendError::Closed(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("ingestion queue closed, dropping message on {}", message.topic);
                false
            }
        }
    }

    /// Number of messages dropped since the queue was created
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side of the ingestion queue
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<InboundMessage>,
}

impl QueueReceiver {
    /// Remove and return all messages queued at the time of the call, oldest first
    ///
    /// Messages that arrive while draining are left for the next call.
    pub fn drain(&mut self) -> Vec<InboundMessage> {
        let queued = self.rx.len();
        let mut batch = Vec::with_capacity(queued);

        for _ in 0..queued {
            match self.rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        batch
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
