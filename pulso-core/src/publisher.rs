//! Publisher façade: tags events with a fixed source name.
//!
//! Collaborators hold an [`EventPublisher`] rather than the raw bus so that
//! every event they emit carries their component name. The constructed event
//! is returned to the caller, whose id feeds the `causation_id` of follow-up
//! events.

use crate::bus::{EventBus, EventBusError};
use crate::event::{Event, EventId, EventType};
use serde_json::Value;

/// Publishes events on behalf of one named component.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    bus: EventBus,
    source: String,
}

impl EventPublisher {
    pub fn new(bus: EventBus, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }

    /// The component name stamped onto every published event.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Construct an event with a fresh id and timestamp, publish it, and
    /// return it.
    pub async fn publish(
        &self,
        event_type: EventType,
        payload: Value,
    ) -> Result<Event, EventBusError> {
        let event = Event::new(event_type, payload, self.source.clone());
        self.bus.publish(event.clone()).await?;
        Ok(event)
    }

    /// Publish an event that belongs to an existing workflow: carries the
    /// caller's correlation id and, optionally, the id of the event that
    /// caused it.
    pub async fn publish_correlated(
        &self,
        event_type: EventType,
        payload: Value,
        correlation_id: impl Into<String>,
        causation_id: Option<EventId>,
    ) -> Result<Event, EventBusError> {
        let mut builder = Event::builder()
            .event_type(event_type)
            .payload(payload)
            .source(self.source.clone())
            .correlation_id(correlation_id);
        if let Some(causation_id) = causation_id {
            builder = builder.causation_id(causation_id);
        }
        let event = builder.build();
        self.bus.publish(event.clone()).await?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBusConfig;
    use crate::event::types;
    use serde_json::json;

    #[tokio::test]
    async fn test_publisher_tags_source_and_returns_event() {
        let bus = EventBus::new(EventBusConfig::default());
        bus.start(1).unwrap();

        let publisher = EventPublisher::new(bus.clone(), "chat-gateway");
        let event = publisher
            .publish(types::MESSAGE_RECEIVED, json!({"text": "hola"}))
            .await
            .unwrap();

        assert_eq!(event.source, "chat-gateway");
        assert_eq!(event.event_type, types::MESSAGE_RECEIVED);
        assert!(event.correlation_id.is_none());

        let history = bus.get_event_history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, event.id);
        bus.stop();
    }

    #[tokio::test]
    async fn test_correlated_publish_chains_causation() {
        let bus = EventBus::default();
        bus.start(1).unwrap();
        let publisher = EventPublisher::new(bus.clone(), "assistant");

        let first = publisher
            .publish_correlated(types::MESSAGE_RECEIVED, json!({}), "session-9", None)
            .await
            .unwrap();
        let second = publisher
            .publish_correlated(
                types::RESPONSE_GENERATED,
                json!({}),
                "session-9",
                Some(first.id),
            )
            .await
            .unwrap();

        assert_eq!(second.correlation_id.as_deref(), Some("session-9"));
        assert_eq!(second.causation_id, Some(first.id));
        bus.stop();
    }

    #[tokio::test]
    async fn test_publisher_propagates_bus_errors() {
        let bus = EventBus::default();
        let publisher = EventPublisher::new(bus, "worker");
        let err = publisher
            .publish(types::TASK_COMPLETED, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::NotRunning));
    }
}
