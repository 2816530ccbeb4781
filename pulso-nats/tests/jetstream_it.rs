//! JetStream transport integration tests. Requires Docker.

use parking_lot::Mutex;
use pulso_core::event::{types, Event};
use pulso_core::transport::TransportError;
use pulso_core::{EventBus, EventBusConfig, EventPublisher};
use pulso_nats::{InboundBridge, JetStreamTransport, JetStreamTransportConfig};
use pulso_testing::TestNats;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn test_config(url: &str, stream_name: &str) -> JetStreamTransportConfig {
    JetStreamTransportConfig {
        urls: vec![url.to_string()],
        stream_name: stream_name.to_string(),
        ..Default::default()
    }
}

/// Collects events delivered to a bus into a shared vec.
fn collect(bus: &EventBus) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe_fn(types::MESSAGE_RECEIVED, move |event| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().push(event);
            Ok(())
        }
    })
    .unwrap();
    seen
}

async fn wait_until(condition: impl Fn() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached within deadline");
}

#[tokio::test]
async fn test_missing_broker_fails_construction() {
    let config = JetStreamTransportConfig {
        urls: vec!["nats://127.0.0.1:1".to_string()],
        connection_timeout_secs: 1,
        max_reconnects: Some(1),
        ..Default::default()
    };

    let err = JetStreamTransport::connect(config).await.unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)));
}

#[tokio::test]
async fn test_cross_process_delivery() {
    let nats = TestNats::start().await.expect("failed to start NATS");

    // "Process A" publishes through the broker.
    let transport_a = JetStreamTransport::connect(test_config(nats.url(), "xproc"))
        .await
        .unwrap();
    let bus_a = EventBus::with_transport(EventBusConfig::default(), Arc::new(transport_a));
    bus_a.start(1).unwrap();

    // "Process B" only consumes, through its own connection and bridge.
    let transport_b = JetStreamTransport::connect(test_config(nats.url(), "xproc"))
        .await
        .unwrap();
    let bus_b = EventBus::new(EventBusConfig::default());
    bus_b.start(1).unwrap();
    let seen_b = collect(&bus_b);
    let _bridge = InboundBridge::spawn(&transport_b, bus_b.clone(), "proc-b")
        .await
        .unwrap();

    let publisher = EventPublisher::new(bus_a.clone(), "gateway");
    let published = publisher
        .publish(types::MESSAGE_RECEIVED, json!({"text": "hola"}))
        .await
        .unwrap();

    wait_until(|| !seen_b.lock().is_empty()).await;

    let received = seen_b.lock()[0].clone();
    assert_eq!(received.id, published.id);
    assert_eq!(received.payload, json!({"text": "hola"}));
    assert_eq!(received.source, "gateway");

    bus_a.stop();
    bus_b.stop();
}

#[tokio::test]
async fn test_self_consumer_sees_local_and_broker_copies() {
    let nats = TestNats::start().await.expect("failed to start NATS");

    let transport = JetStreamTransport::connect(test_config(nats.url(), "selfloop"))
        .await
        .unwrap();
    let bus = EventBus::with_transport(EventBusConfig::default(), Arc::new(transport.clone()));
    bus.start(1).unwrap();

    let seen = collect(&bus);
    let _bridge = InboundBridge::spawn(&transport, bus.clone(), "self")
        .await
        .unwrap();

    let publisher = EventPublisher::new(bus.clone(), "assistant");
    let published = publisher
        .publish(types::MESSAGE_RECEIVED, json!({}))
        .await
        .unwrap();

    // One local delivery plus one bridged copy of the same event: the
    // documented at-least-once behavior that makes idempotent handlers
    // mandatory.
    wait_until(|| seen.lock().len() >= 2).await;
    assert!(seen.lock().iter().all(|e| e.id == published.id));

    bus.stop();
}

#[tokio::test]
async fn test_durable_consumer_replays_events_published_before_subscribe() {
    let nats = TestNats::start().await.expect("failed to start NATS");

    let transport = JetStreamTransport::connect(test_config(nats.url(), "replay"))
        .await
        .unwrap();
    let bus_producer = EventBus::with_transport(EventBusConfig::default(), Arc::new(transport.clone()));
    bus_producer.start(1).unwrap();

    let publisher = EventPublisher::new(bus_producer.clone(), "gateway");
    let published = publisher
        .publish(types::MESSAGE_RECEIVED, json!({"n": 1}))
        .await
        .unwrap();

    // A consumer created afterwards still receives the stored event.
    let bus_late = EventBus::new(EventBusConfig::default());
    bus_late.start(1).unwrap();
    let seen = collect(&bus_late);
    let _bridge = InboundBridge::spawn(&transport, bus_late.clone(), "latecomer")
        .await
        .unwrap();

    wait_until(|| !seen.lock().is_empty()).await;
    assert_eq!(seen.lock()[0].id, published.id);

    bus_producer.stop();
    bus_late.stop();
}
