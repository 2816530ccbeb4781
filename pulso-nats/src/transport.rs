//! JetStream-backed [`Transport`] implementation.

use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, PullConsumer};
use async_nats::jetstream::stream::{
    Config as StreamConfig, DiscardPolicy, RetentionPolicy, StorageType,
};
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use pulso_core::event::{Event, EventType};
use pulso_core::transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// JetStream connection and stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JetStreamTransportConfig {
    /// NATS server URLs; the first is used for the connection.
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,
    /// JetStream stream name, doubling as the subject prefix:
    /// events go to `{stream_name}.{event_type}`.
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connection_timeout_secs: u64,
    /// Max reconnection attempts (None = infinite).
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: Option<usize>,
    /// Client connection name.
    #[serde(default)]
    pub name: Option<String>,
    /// How long the broker waits for an ack before redelivering.
    #[serde(default = "default_ack_wait")]
    pub ack_wait_secs: u64,
    /// Redelivery cap per message.
    #[serde(default = "default_max_deliver")]
    pub max_deliver: i64,
}

impl Default for JetStreamTransportConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            stream_name: default_stream_name(),
            connection_timeout_secs: default_connect_timeout(),
            max_reconnects: default_max_reconnects(),
            name: None,
            ack_wait_secs: default_ack_wait(),
            max_deliver: default_max_deliver(),
        }
    }
}

fn default_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

fn default_stream_name() -> String {
    "pulso".to_string()
}

const fn default_connect_timeout() -> u64 {
    5
}

fn default_max_reconnects() -> Option<usize> {
    Some(5)
}

const fn default_ack_wait() -> u64 {
    30
}

const fn default_max_deliver() -> i64 {
    5
}

impl JetStreamTransportConfig {
    /// Returns the primary URL for the connection.
    pub fn primary_url(&self) -> &str {
        self.urls
            .first()
            .map(|s| s.as_str())
            .unwrap_or("nats://localhost:4222")
    }

    /// Broker subject for an event type: `{stream_name}.{event_type}`.
    pub fn subject_for(&self, event_type: &EventType) -> String {
        format!("{}.{}", self.stream_name, event_type)
    }
}

/// Publishes events onto a persistent JetStream stream.
///
/// Connecting performs the capability check: an unreachable broker fails
/// construction instead of degrading to local-only delivery.
#[derive(Clone)]
pub struct JetStreamTransport {
    client: Client,
    jetstream: JetStreamContext,
    config: Arc<JetStreamTransportConfig>,
}

impl JetStreamTransport {
    /// Connect to the broker and ensure the event stream exists.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connection`] when the broker is unreachable or the
    /// stream cannot be created.
    pub async fn connect(config: JetStreamTransportConfig) -> Result<Self, TransportError> {
        let mut options = ConnectOptions::default()
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs));

        if let Some(name) = &config.name {
            options = options.name(name);
        }
        if let Some(max_reconnects) = config.max_reconnects {
            options = options.max_reconnects(max_reconnects);
        }

        let client = async_nats::connect_with_options(config.primary_url(), options)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let jetstream = async_nats::jetstream::new(client.clone());

        let transport = Self {
            client,
            jetstream,
            config: Arc::new(config),
        };
        transport.ensure_stream().await?;

        info!(
            url = transport.config.primary_url(),
            stream = %transport.config.stream_name,
            "connected to JetStream"
        );
        Ok(transport)
    }

    /// Transport configuration.
    pub fn config(&self) -> &JetStreamTransportConfig {
        &self.config
    }

    /// Underlying NATS client, for health checks.
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn ensure_stream(&self) -> Result<(), TransportError> {
        // Limits retention, not a work queue: every process's durable
        // consumer must see every event for cross-process fan-out.
        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![format!("{}.>", self.config.stream_name)],
            retention: RetentionPolicy::Limits,
            max_age: Duration::from_secs(24 * 60 * 60),
            max_bytes: 1024 * 1024 * 1024,
            max_messages: 1_000_000,
            storage: StorageType::File,
            num_replicas: 1,
            discard: DiscardPolicy::Old,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        debug!(stream = %self.config.stream_name, "stream ensured");
        Ok(())
    }

    /// Get or create the durable pull consumer used by an inbound bridge.
    ///
    /// `consumer_name` identifies the consuming process; each distinct name
    /// receives its own copy of every event.
    pub(crate) async fn consumer(
        &self,
        consumer_name: &str,
    ) -> Result<PullConsumer, TransportError> {
        let mut stream = self
            .jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let consumer_id = format!("{}-{}", self.config.stream_name, consumer_name);
        if let Ok(consumer) = stream.get_consumer(&consumer_id).await {
            debug!(consumer = %consumer_id, "consumer already exists");
            return Ok(consumer);
        }

        info!(consumer = %consumer_id, "creating durable consumer");
        let consumer_config = PullConsumerConfig {
            durable_name: Some(consumer_id),
            deliver_policy: DeliverPolicy::All,
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.config.ack_wait_secs),
            max_deliver: self.config.max_deliver,
            ..Default::default()
        };

        stream
            .create_consumer(consumer_config)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

#[async_trait]
impl Transport for JetStreamTransport {
    async fn forward(&self, event: &Event) -> Result<(), TransportError> {
        let subject = self.config.subject_for(&event.event_type);
        let payload = event
            .to_bytes()
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let ack = self
            .jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        // The second await confirms the broker stored the message.
        ack.await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        debug!(event_id = %event.id, subject, "event forwarded to broker");
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for JetStreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulso_core::event::types;

    #[test]
    fn test_config_defaults() {
        let config = JetStreamTransportConfig::default();
        assert_eq!(config.urls, vec!["nats://localhost:4222"]);
        assert_eq!(config.stream_name, "pulso");
        assert_eq!(config.connection_timeout_secs, 5);
        assert_eq!(config.max_reconnects, Some(5));
        assert_eq!(config.ack_wait_secs, 30);
        assert_eq!(config.max_deliver, 5);
    }

    #[test]
    fn test_subject_mapping() {
        let config = JetStreamTransportConfig {
            stream_name: "assistant".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.subject_for(&types::MESSAGE_RECEIVED),
            "assistant.message.received"
        );
        assert_eq!(
            config.subject_for(&EventType::new("custom.type")),
            "assistant.custom.type"
        );
    }

    #[test]
    fn test_primary_url_picks_first() {
        let config = JetStreamTransportConfig {
            urls: vec![
                "nats://one:4222".to_string(),
                "nats://two:4222".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(config.primary_url(), "nats://one:4222");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: JetStreamTransportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.stream_name, "pulso");

        let config: JetStreamTransportConfig =
            serde_json::from_str(r#"{"stream_name": "edge", "ack_wait_secs": 10}"#).unwrap();
        assert_eq!(config.stream_name, "edge");
        assert_eq!(config.ack_wait_secs, 10);
    }
}
