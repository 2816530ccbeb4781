//! # pulso-core
//!
//! Event-driven core with zero infrastructure dependencies: an in-process
//! event bus with a cooperative worker pool, the publisher/handler contract,
//! and the event store abstraction with an in-memory backend.
//!
//! ## Architecture
//!
//! The bus and the store are decoupled. Publishing delivers to live
//! subscribers and implies no persistence; appending to a store records a
//! durable fact and implies no delivery. Cross-process delivery is a
//! [`transport::Transport`] concern, injected into the bus; see the
//! `pulso-nats` crate for the JetStream-backed implementation, and
//! `pulso-pg` for the PostgreSQL store backend.
//!
//! ## Modules
//!
//! - [`event`]: [`Event`], [`EventType`], identifier newtypes, wire format
//! - [`bus`]: [`EventBus`] worker-pool dispatcher and its lifecycle
//! - [`publisher`]: [`EventPublisher`] source-tagging façade
//! - [`handler`]: the [`EventHandler`] capability
//! - [`store`]: [`EventStore`] contract and the in-memory backend
//! - [`transport`]: the cross-process delivery seam
//! - [`telemetry`]: tracing bootstrap
//!
//! ## Usage
//!
//! ```rust
//! use pulso_core::{EventBus, EventBusConfig, EventPublisher};
//! use pulso_core::event::types;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new(EventBusConfig::default());
//! bus.start(1).unwrap();
//!
//! bus.subscribe_fn(types::MESSAGE_RECEIVED, |event| async move {
//!     println!("got {}", event.id);
//!     Ok(())
//! })
//! .unwrap();
//!
//! let publisher = EventPublisher::new(bus.clone(), "chat-gateway");
//! publisher
//!     .publish(types::MESSAGE_RECEIVED, json!({"text": "hola"}))
//!     .await
//!     .unwrap();
//!
//! bus.stop();
//! # }
//! ```

pub mod bus;
pub mod event;
pub mod handler;
pub mod publisher;
pub mod store;
pub mod telemetry;
pub mod transport;

pub use bus::{BusMetricsSnapshot, BusState, EventBus, EventBusConfig, EventBusError, SubscriptionId};
pub use event::{Event, EventBuilder, EventId, EventType, SerializationError, StreamId};
pub use handler::{EventHandler, FnHandler, HandlerError};
pub use publisher::EventPublisher;
pub use store::memory::InMemoryEventStore;
pub use store::{EventFilter, EventStore, EventStoreError, EventStream, DEFAULT_QUERY_LIMIT};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use transport::{LocalTransport, Transport, TransportError};
