//! Event types for the pulso core.
//!
//! This module contains [`Event`], [`EventType`], and the identifier newtypes
//! that every other part of the workspace builds on. Events are immutable:
//! once constructed they are only ever cloned, never mutated. A derived event
//! is built fresh through [`Event::builder`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use uuid::Uuid;

/// Globally unique event identifier, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an event-store stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Routing key and wire-format discriminator for an event.
///
/// Event types are string-backed rather than a closed enum so that
/// collaborators can mint new types at runtime without touching this crate.
/// The published set lives in [`types`] and is append-only; the bus and the
/// stores treat the value opaquely.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(Cow<'static, str>);

impl EventType {
    /// Construct a type from a static well-known name.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Construct a type from a runtime-owned name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known event types published by the platform.
///
/// Additions to this set are append-only; renaming or removing a constant is
/// a wire-format break for every stored event of that type.
pub mod types {
    use super::EventType;

    pub const CONVERSATION_STARTED: EventType = EventType::from_static("conversation.started");
    pub const MESSAGE_RECEIVED: EventType = EventType::from_static("message.received");
    pub const RESPONSE_GENERATED: EventType = EventType::from_static("response.generated");
    pub const FEEDBACK_SUBMITTED: EventType = EventType::from_static("feedback.submitted");
    pub const MODEL_UPDATED: EventType = EventType::from_static("model.updated");
    pub const AGENT_RECOVERED: EventType = EventType::from_static("agent.recovered");
    pub const TASK_SCHEDULED: EventType = EventType::from_static("task.scheduled");
    pub const TASK_COMPLETED: EventType = EventType::from_static("task.completed");
    pub const SYSTEM_ALERT: EventType = EventType::from_static("system.alert");
}

/// Failure to encode or decode an [`Event`] on the JSON wire format.
#[derive(Debug, thiserror::Error)]
#[error("event serialization failed: {0}")]
pub struct SerializationError(#[from] serde_json::Error);

/// An immutable message describing something that happened.
///
/// Wire format (JSON):
///
/// ```json
/// {
///   "id": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
///   "type": "message.received",
///   "payload": {"text": "hola"},
///   "source": "chat-gateway",
///   "correlation_id": "session-42",
///   "causation_id": null,
///   "timestamp": "2025-11-03T17:41:28.123456Z"
/// }
/// ```
///
/// The round trip through [`Event::to_json`] / [`Event::from_json`] is
/// lossless for every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier, assigned at construction.
    pub id: EventId,

    /// Routing key and serialization discriminator.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Arbitrary structured data.
    pub payload: Value,

    /// Name of the producing component, set by the publisher façade.
    pub source: String,

    /// Groups events belonging to one logical workflow or session.
    /// Propagated by the producer, never generated by the bus.
    pub correlation_id: Option<String>,

    /// Id of the event that triggered this one.
    pub causation_id: Option<EventId>,

    /// Creation time, used for history ordering.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Event {
    /// Create an event with a fresh id and timestamp.
    pub fn new(event_type: EventType, payload: Value, source: impl Into<String>) -> Self {
        Self::builder()
            .event_type(event_type)
            .payload(payload)
            .source(source)
            .build()
    }

    /// Create a builder for constructing an event with correlation metadata.
    pub fn builder() -> EventBuilder {
        EventBuilder::new()
    }

    /// Encode to the JSON wire format.
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire format.
    pub fn from_json(raw: &str) -> Result<Self, SerializationError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode to wire bytes, for broker transports.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from wire bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, SerializationError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Builder for constructing an [`Event`].
#[derive(Debug, Default)]
pub struct EventBuilder {
    event_type: Option<EventType>,
    payload: Option<Value>,
    source: Option<String>,
    correlation_id: Option<String>,
    causation_id: Option<EventId>,
}

impl EventBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn causation_id(mut self, causation_id: EventId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Build the event, assigning a fresh id and timestamp.
    ///
    /// # Panics
    ///
    /// Panics if `event_type`, `payload`, or `source` are not set.
    pub fn build(self) -> Event {
        let event_type = self.event_type.expect("event_type is required");
        let payload = self.payload.expect("payload is required");
        let source = self.source.expect("source is required");

        Event {
            id: EventId::new(),
            event_type,
            payload,
            source,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_ids_are_unique() {
        let a = EventId::new();
        let b = EventId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_type_static_and_owned_compare_equal() {
        let owned = EventType::new("message.received");
        assert_eq!(owned, types::MESSAGE_RECEIVED);
        assert_eq!(owned.as_str(), "message.received");
    }

    #[test]
    fn test_wire_round_trip_is_lossless() {
        let cause = EventId::new();
        let event = Event::builder()
            .event_type(types::RESPONSE_GENERATED)
            .payload(json!({"text": "done", "tokens": 42}))
            .source("llm-orchestrator")
            .correlation_id("session-7")
            .causation_id(cause)
            .build();

        let raw = event.to_json().unwrap();
        let decoded = Event::from_json(&raw).unwrap();

        assert_eq!(decoded, event);
        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.event_type, event.event_type);
        assert_eq!(decoded.payload, event.payload);
        assert_eq!(decoded.source, event.source);
        assert_eq!(decoded.correlation_id, event.correlation_id);
        assert_eq!(decoded.causation_id, Some(cause));
        assert_eq!(decoded.timestamp, event.timestamp);
    }

    #[test]
    fn test_wire_field_names() {
        let event = Event::new(types::SYSTEM_ALERT, json!({"level": "warn"}), "monitor");
        let value: Value = serde_json::to_value(&event).unwrap();
        let object = value.as_object().unwrap();

        for key in [
            "id",
            "type",
            "payload",
            "source",
            "correlation_id",
            "causation_id",
            "timestamp",
        ] {
            assert!(object.contains_key(key), "missing wire field {key}");
        }
        assert!(object["causation_id"].is_null());
        assert_eq!(object["type"], json!("system.alert"));
    }

    #[test]
    fn test_derived_event_keeps_original_untouched() {
        let first = Event::new(types::MESSAGE_RECEIVED, json!({"text": "hi"}), "gateway");
        let derived = Event::builder()
            .event_type(types::RESPONSE_GENERATED)
            .payload(json!({"text": "hello"}))
            .source("assistant")
            .causation_id(first.id)
            .build();

        assert_ne!(derived.id, first.id);
        assert_eq!(derived.causation_id, Some(first.id));
        assert_eq!(first.event_type, types::MESSAGE_RECEIVED);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(Event::from_bytes(b"not json").is_err());
    }
}
