//! Inbound bridge: broker messages back into local dispatch.

use crate::transport::JetStreamTransport;
use futures::StreamExt;
use pulso_core::event::Event;
use pulso_core::transport::TransportError;
use pulso_core::EventBus;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Consumes the durable stream and re-injects each event into the local bus.
///
/// Delivery is at-least-once: a message is acknowledged only after
/// `publish_local` accepts it, so an ack timeout (or a full local queue)
/// leads to redelivery. Handlers behind the bus must be idempotent.
pub struct InboundBridge {
    task: JoinHandle<()>,
}

impl InboundBridge {
    /// Create (or resume) the durable consumer named for this process and
    /// start pumping events into `bus`.
    pub async fn spawn(
        transport: &JetStreamTransport,
        bus: EventBus,
        consumer_name: &str,
    ) -> Result<Self, TransportError> {
        let consumer = transport.consumer(consumer_name).await?;
        let task = tokio::spawn(pump(consumer, bus));
        Ok(Self { task })
    }

    /// Stop consuming. Also happens on drop.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for InboundBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn pump(consumer: async_nats::jetstream::consumer::PullConsumer, bus: EventBus) {
    let mut messages = match consumer.messages().await {
        Ok(messages) => messages,
        Err(error) => {
            error!(%error, "failed to open consumer message stream");
            return;
        }
    };

    while let Some(result) = messages.next().await {
        let message = match result {
            Ok(message) => message,
            Err(error) => {
                error!(%error, "error receiving from broker");
                break;
            }
        };

        let event = match Event::from_bytes(&message.payload) {
            Ok(event) => event,
            Err(error) => {
                // Undecodable messages are acknowledged so they do not
                // poison the consumer with endless redeliveries.
                error!(%error, "dropping undecodable broker message");
                if let Err(ack_error) = message.ack().await {
                    error!(%ack_error, "failed to ack poison message");
                }
                continue;
            }
        };

        match bus.publish_local(event).await {
            Ok(()) => {
                if let Err(ack_error) = message.ack().await {
                    warn!(%ack_error, "failed to ack message");
                }
                debug!("inbound event injected into local dispatch");
            }
            Err(error) => {
                // No ack: the broker redelivers after the ack timeout.
                warn!(%error, "local dispatch rejected inbound event, leaving unacked");
            }
        }
    }

    debug!("inbound bridge exiting");
}
