//! # pulso-nats
//!
//! NATS JetStream implementation of the [`pulso_core::Transport`] seam,
//! giving the in-process bus at-least-once, cross-process delivery.
//!
//! Two pieces compose around one [`pulso_core::EventBus`]:
//!
//! - [`JetStreamTransport`]: injected into the bus; every published event
//!   is additionally written to the broker subject
//!   `{stream_name}.{event_type}` and acknowledged by JetStream.
//! - [`InboundBridge`]: a durable pull consumer that re-injects broker
//!   messages into local dispatch via `publish_local`.
//!
//! The broker may redeliver a message after an acknowledgement timeout, and
//! a process consuming its own published subjects sees those events twice
//! (once locally, once via the broker). There is no dedup layer: **handlers
//! must be idempotent**.
//!
//! Construction fails fast when the broker is unreachable; a missing broker
//! never degrades silently to local-only delivery.
//!
//! ```rust,ignore
//! use pulso_core::{EventBus, EventBusConfig};
//! use pulso_nats::{InboundBridge, JetStreamTransport, JetStreamTransportConfig};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(JetStreamTransport::connect(JetStreamTransportConfig::default()).await?);
//! let bus = EventBus::with_transport(EventBusConfig::default(), transport.clone());
//! bus.start(4)?;
//! let bridge = InboundBridge::spawn(&transport, bus.clone(), "billing-service").await?;
//! ```

mod bridge;
mod transport;

pub use bridge::InboundBridge;
pub use transport::{JetStreamTransport, JetStreamTransportConfig};
