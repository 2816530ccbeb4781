//! Transport seam for cross-process delivery.
//!
//! The bus always dispatches locally; a [`Transport`] injected at
//! construction decides whether published events additionally leave the
//! process. [`LocalTransport`] is the in-process default and forwards
//! nothing. `pulso-nats` provides the JetStream-backed implementation.

use crate::event::Event;
use async_trait::async_trait;

/// Errors raised by a transport while forwarding events to a broker.
///
/// These surface distinctly from local-dispatch failures so a caller can
/// decide to fall back to local-only delivery or fail the operation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker publish error: {0}")]
    Publish(String),

    #[error("transport serialization error: {0}")]
    Serialization(String),
}

/// Forwards published events beyond the local process.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Forward one event to the broker. Called after the event has been
    /// enqueued for local dispatch.
    async fn forward(&self, event: &Event) -> Result<(), TransportError>;

    /// Whether forwarded events survive process restarts.
    fn is_durable(&self) -> bool {
        false
    }
}

/// In-process default: nothing leaves the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn forward(&self, _event: &Event) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_transport_is_a_no_op() {
        let transport = LocalTransport;
        let event = Event::new(types::TASK_SCHEDULED, json!({}), "scheduler");
        assert!(transport.forward(&event).await.is_ok());
        assert!(!transport.is_durable());
    }
}
