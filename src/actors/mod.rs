//! Actor-based ingestion pipeline
//!
//! Each actor runs as an independent async task and is controlled through a handle
//! that sends commands over an mpsc channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!        MQTT broker
//!             │ publish
//!     ┌───────▼────────┐
//!     │  BrokerActor   │  rumqttc event loop, reconnect with backoff
//!     └───────┬────────┘
//!             │ try_send (drops when full)
//!     ┌───────▼────────┐
//!     │ Ingestion queue│  bounded mpsc
//!     └───────┬────────┘
//!             │ drain once per tick
//!     ┌───────▼────────┐      ┌──────────────┐
//!     │ ProcessorActor ├─────►│ SQLite store │
//!     └───────┬────────┘      └──────────────┘
//!             │ every export interval
//!     ┌───────▼────────┐
//!     │  CSV + JSON    │
//!     └────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **BrokerActor**: Owns the MQTT session and enqueues every incoming message
//! - **ProcessorActor**: Validates, stores, alerts, exports and sweeps
//!
//! Both share a [`messages::RuntimeStats`] for counters and connection state.

pub mod backoff;
pub mod broker;
pub mod messages;
pub mod processor;
