//! In-process event bus with a cooperative worker pool.
//!
//! The bus delivers published events to every registered handler interested
//! in the event's type. Dispatch is crash-isolated per handler: one failing
//! or hanging handler never blocks delivery to the others and never
//! propagates to the publisher.
//!
//! # Lifecycle
//!
//! `NotStarted → Running → Stopping → Stopped`. Publishing is only valid
//! while `Running` and fails fast otherwise. A stopped bus cannot be
//! restarted; construct a new instance.
//!
//! # Ordering
//!
//! With one worker, events are dispatched in publish order (FIFO for any
//! single handler). With more than one worker, workers race for items off
//! the shared queue and no cross-event ordering is guaranteed, only
//! non-loss: every enqueued event is dequeued by exactly one worker.

use crate::event::{Event, EventType};
use crate::handler::{EventHandler, HandlerError};
use crate::transport::{LocalTransport, Transport, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors for bus operations.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// The bus has not been started; publishing fails fast by policy.
    #[error("event bus is not running")]
    NotRunning,

    /// `start` was called while the bus was already running.
    #[error("event bus is already running")]
    AlreadyRunning,

    /// The bus has been stopped; construct a new instance.
    #[error("event bus has been stopped; construct a new instance")]
    Stopped,

    /// The dispatch queue is full; the publisher is ahead of the workers.
    #[error("event queue is full")]
    QueueFull,

    /// No registry entry matched the subscription id.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// The injected transport failed; local dispatch already happened.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Bus lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

/// Identifier returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Capacity of the shared dispatch queue. A full queue rejects
    /// publishers with [`EventBusError::QueueFull`].
    pub queue_capacity: usize,
    /// Capacity of the diagnostic history ring; oldest events are evicted
    /// first.
    pub history_capacity: usize,
    /// Per-handler invocation timeout. A handler that exceeds it is logged
    /// and skipped, so a hung handler cannot starve a worker indefinitely.
    pub handler_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            history_capacity: 1000,
            handler_timeout: Duration::from_secs(30),
        }
    }
}

impl EventBusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }
}

/// Dispatch counters, updated by publishers and workers.
#[derive(Debug, Default)]
struct BusMetrics {
    published: AtomicU64,
    dispatched: AtomicU64,
    handler_errors: AtomicU64,
    handler_timeouts: AtomicU64,
}

/// Point-in-time snapshot of the bus counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMetricsSnapshot {
    /// Events accepted by `publish`/`publish_local`.
    pub published: u64,
    /// Successful handler invocations.
    pub dispatched: u64,
    /// Handler invocations that returned an error.
    pub handler_errors: u64,
    /// Handler invocations cut off by the timeout.
    pub handler_timeouts: u64,
}

type Registry = HashMap<EventType, Vec<(SubscriptionId, Arc<dyn EventHandler>)>>;

struct BusInner {
    config: EventBusConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<BusState>,
    registry: RwLock<Registry>,
    history: RwLock<VecDeque<Event>>,
    tx: RwLock<Option<mpsc::Sender<Event>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: BusMetrics,
}

/// In-process pub/sub dispatcher with a worker pool.
///
/// Cheap to clone; all clones share the same registry, queue, and history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    /// Create a bus with the in-process [`LocalTransport`].
    pub fn new(config: EventBusConfig) -> Self {
        Self::with_transport(config, Arc::new(LocalTransport))
    }

    /// Create a bus with an injected transport (e.g. JetStream-backed).
    pub fn with_transport(config: EventBusConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                transport,
                state: Mutex::new(BusState::NotStarted),
                registry: RwLock::new(HashMap::new()),
                history: RwLock::new(VecDeque::new()),
                tx: RwLock::new(None),
                workers: Mutex::new(Vec::new()),
                metrics: BusMetrics::default(),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BusState {
        *self.inner.state.lock()
    }

    /// Snapshot of the dispatch counters.
    pub fn metrics(&self) -> BusMetricsSnapshot {
        let m = &self.inner.metrics;
        BusMetricsSnapshot {
            published: m.published.load(Ordering::Relaxed),
            dispatched: m.dispatched.load(Ordering::Relaxed),
            handler_errors: m.handler_errors.load(Ordering::Relaxed),
            handler_timeouts: m.handler_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Spawn the worker pool and transition to `Running`.
    ///
    /// `num_workers` is clamped to at least 1. One worker gives FIFO
    /// dispatch; more workers trade ordering for throughput (see the module
    /// docs).
    ///
    /// # Errors
    ///
    /// [`EventBusError::AlreadyRunning`] if already started, or
    /// [`EventBusError::Stopped`] once the bus has been stopped.
    pub fn start(&self, num_workers: usize) -> Result<(), EventBusError> {
        let mut state = self.inner.state.lock();
        match *state {
            BusState::NotStarted => {}
            BusState::Running => return Err(EventBusError::AlreadyRunning),
            BusState::Stopping | BusState::Stopped => return Err(EventBusError::Stopped),
        }

        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
        *self.inner.tx.write() = Some(tx);

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = self.inner.workers.lock();
        for worker_id in 0..num_workers.max(1) {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(dispatch_loop(worker_id, inner, rx)));
        }

        *state = BusState::Running;
        debug!(num_workers = num_workers.max(1), "event bus started");
        Ok(())
    }

    /// Stop the bus: close the queue, cancel the workers, and tear down the
    /// registry and history.
    ///
    /// Shutdown is best-effort, not transactional: in-flight handler calls
    /// may be aborted mid-await with no completion guarantee. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            match *state {
                BusState::Running => *state = BusState::Stopping,
                BusState::NotStarted => {
                    *state = BusState::Stopped;
                    return;
                }
                BusState::Stopping | BusState::Stopped => return,
            }
        }

        *self.inner.tx.write() = None;
        let handles: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
        }

        self.inner.registry.write().clear();
        self.inner.history.write().clear();
        *self.inner.state.lock() = BusState::Stopped;
        debug!("event bus stopped");
    }

    /// Publish an event: record it in the history, enqueue it for local
    /// dispatch, then forward it to the transport.
    ///
    /// Fire-and-forget with respect to handlers: dispatch failures never
    /// reach the publisher. The local enqueue happens before the broker
    /// forward, so [`EventBusError::Transport`] means the event is already
    /// on its way to local handlers but did not reach the broker.
    ///
    /// # Errors
    ///
    /// [`EventBusError::NotRunning`] before `start` (fail-fast policy),
    /// [`EventBusError::Stopped`] after `stop`,
    /// [`EventBusError::QueueFull`] when the queue rejects the event.
    pub async fn publish(&self, event: Event) -> Result<(), EventBusError> {
        self.enqueue(&event)?;
        self.inner.transport.forward(&event).await?;
        Ok(())
    }

    /// Publish for local dispatch only, skipping the transport.
    ///
    /// Used by broker bridges to re-inject inbound events without echoing
    /// them back out.
    pub async fn publish_local(&self, event: Event) -> Result<(), EventBusError> {
        self.enqueue(&event)
    }

    fn enqueue(&self, event: &Event) -> Result<(), EventBusError> {
        match *self.inner.state.lock() {
            BusState::Running => {}
            BusState::NotStarted => return Err(EventBusError::NotRunning),
            BusState::Stopping | BusState::Stopped => return Err(EventBusError::Stopped),
        }

        self.record_history(event);

        let tx = self.inner.tx.read().clone();
        let tx = tx.ok_or(EventBusError::NotRunning)?;
        tx.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => EventBusError::QueueFull,
            TrySendError::Closed(_) => EventBusError::Stopped,
        })?;

        self.inner.metrics.published.fetch_add(1, Ordering::Relaxed);
        debug!(event_id = %event.id, event_type = %event.event_type, "event enqueued");
        Ok(())
    }

    fn record_history(&self, event: &Event) {
        let capacity = self.inner.config.history_capacity;
        if capacity == 0 {
            return;
        }
        let mut history = self.inner.history.write();
        history.push_back(event.clone());
        while history.len() > capacity {
            history.pop_front();
        }
    }

    /// Register a handler for one event type.
    ///
    /// Valid while `NotStarted` or `Running`; subscriptions made before
    /// `start` take effect on the first dispatched event.
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId, EventBusError> {
        self.check_accepts_subscriptions()?;
        let id = SubscriptionId::new();
        self.inner
            .registry
            .write()
            .entry(event_type)
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    /// Register a handler for every type in its interest set under a single
    /// subscription id.
    pub fn register(&self, handler: Arc<dyn EventHandler>) -> Result<SubscriptionId, EventBusError> {
        self.check_accepts_subscriptions()?;
        let id = SubscriptionId::new();
        let mut registry = self.inner.registry.write();
        for event_type in handler.interest_set() {
            registry
                .entry(event_type)
                .or_default()
                .push((id, Arc::clone(&handler)));
        }
        Ok(id)
    }

    /// Register an async closure as a handler for one event type.
    pub fn subscribe_fn<F, Fut>(
        &self,
        event_type: EventType,
        callback: F,
    ) -> Result<SubscriptionId, EventBusError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler = crate::handler::FnHandler::new(event_type.clone(), callback);
        self.subscribe(event_type, Arc::new(handler))
    }

    /// Remove every registry entry created under `subscription_id`.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<(), EventBusError> {
        let mut registry = self.inner.registry.write();
        let mut removed = false;
        registry.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(id, _)| *id != subscription_id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        if removed {
            Ok(())
        } else {
            Err(EventBusError::SubscriptionNotFound(subscription_id))
        }
    }

    /// Snapshot of the retained history, optionally filtered by type.
    ///
    /// Diagnostic replay only, independent of any durable store. Returns
    /// oldest-first, bounded by the configured ring capacity.
    pub fn get_event_history(&self, event_type: Option<&EventType>) -> Vec<Event> {
        let history = self.inner.history.read();
        match event_type {
            Some(wanted) => history
                .iter()
                .filter(|e| &e.event_type == wanted)
                .cloned()
                .collect(),
            None => history.iter().cloned().collect(),
        }
    }

    fn check_accepts_subscriptions(&self) -> Result<(), EventBusError> {
        match *self.inner.state.lock() {
            BusState::NotStarted | BusState::Running => Ok(()),
            BusState::Stopping | BusState::Stopped => Err(EventBusError::Stopped),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Worker loop: pull one event at a time off the shared queue and dispatch
/// it to every interested handler.
async fn dispatch_loop(
    worker_id: usize,
    inner: Arc<BusInner>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
) {
    loop {
        let event = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(event) = event else {
            break;
        };
        dispatch_one(worker_id, &inner, event).await;
    }
    debug!(worker_id, "dispatch worker exiting");
}

async fn dispatch_one(worker_id: usize, inner: &BusInner, event: Event) {
    let handlers: Vec<(SubscriptionId, Arc<dyn EventHandler>)> = inner
        .registry
        .read()
        .get(&event.event_type)
        .cloned()
        .unwrap_or_default();

    if handlers.is_empty() {
        debug!(event_type = %event.event_type, "no handlers registered");
        return;
    }

    for (subscription, handler) in handlers {
        match tokio::time::timeout(inner.config.handler_timeout, handler.handle(&event)).await {
            Ok(Ok(())) => {
                inner.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(error)) => {
                inner.metrics.handler_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker_id,
                    subscription = %subscription,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    %error,
                    "event handler failed"
                );
            }
            Err(_) => {
                inner
                    .metrics
                    .handler_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker_id,
                    subscription = %subscription,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    timeout = ?inner.config.handler_timeout,
                    "event handler timed out"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types;
    use serde_json::json;

    fn sample_event(event_type: EventType) -> Event {
        Event::new(event_type, json!({"n": 1}), "test")
    }

    #[test]
    fn test_config_defaults_and_builders() {
        let config = EventBusConfig::default();
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.handler_timeout, Duration::from_secs(30));

        let config = EventBusConfig::new()
            .with_queue_capacity(8)
            .with_history_capacity(2)
            .with_handler_timeout(Duration::from_millis(50));
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.history_capacity, 2);
        assert_eq!(config.handler_timeout, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_publish_before_start_fails_fast() {
        let bus = EventBus::default();
        let err = bus
            .publish(sample_event(types::TASK_SCHEDULED))
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::NotRunning));
    }

    #[tokio::test]
    async fn test_start_twice_is_an_error() {
        let bus = EventBus::default();
        bus.start(1).unwrap();
        assert!(matches!(bus.start(1), Err(EventBusError::AlreadyRunning)));
        bus.stop();
    }

    #[tokio::test]
    async fn test_stopped_bus_cannot_restart() {
        let bus = EventBus::default();
        bus.start(2).unwrap();
        bus.stop();
        assert_eq!(bus.state(), BusState::Stopped);
        assert!(matches!(bus.start(1), Err(EventBusError::Stopped)));
        let err = bus
            .publish(sample_event(types::TASK_SCHEDULED))
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::Stopped));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_tears_down() {
        let bus = EventBus::default();
        bus.start(1).unwrap();
        bus.subscribe_fn(types::SYSTEM_ALERT, |_| async { Ok(()) })
            .unwrap();
        bus.publish(sample_event(types::SYSTEM_ALERT)).await.unwrap();

        bus.stop();
        bus.stop();

        assert!(bus.get_event_history(None).is_empty());
        assert!(matches!(
            bus.subscribe_fn(types::SYSTEM_ALERT, |_| async { Ok(()) }),
            Err(EventBusError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_subscribe_before_start_is_allowed() {
        let bus = EventBus::default();
        let id = bus
            .subscribe_fn(types::MESSAGE_RECEIVED, |_| async { Ok(()) })
            .unwrap();
        bus.start(1).unwrap();
        bus.unsubscribe(id).unwrap();
        bus.stop();
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_id_errors() {
        let bus = EventBus::default();
        let bogus = SubscriptionId(Uuid::new_v4());
        assert!(matches!(
            bus.unsubscribe(bogus),
            Err(EventBusError::SubscriptionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_ring_evicts_oldest_first() {
        let bus = EventBus::new(EventBusConfig::new().with_history_capacity(3));
        bus.start(1).unwrap();

        let mut ids = Vec::new();
        for _ in 0..5 {
            let event = sample_event(types::TASK_COMPLETED);
            ids.push(event.id);
            bus.publish(event).await.unwrap();
        }

        let history = bus.get_event_history(None);
        assert_eq!(history.len(), 3);
        let kept: Vec<_> = history.iter().map(|e| e.id).collect();
        assert_eq!(kept, ids[2..].to_vec());
        bus.stop();
    }

    #[tokio::test]
    async fn test_history_filter_by_type() {
        let bus = EventBus::default();
        bus.start(1).unwrap();
        bus.publish(sample_event(types::TASK_SCHEDULED)).await.unwrap();
        bus.publish(sample_event(types::TASK_COMPLETED)).await.unwrap();
        bus.publish(sample_event(types::TASK_SCHEDULED)).await.unwrap();

        let scheduled = bus.get_event_history(Some(&types::TASK_SCHEDULED));
        assert_eq!(scheduled.len(), 2);
        assert!(scheduled.iter().all(|e| e.event_type == types::TASK_SCHEDULED));
        bus.stop();
    }

    #[tokio::test]
    async fn test_queue_full_rejects_publisher() {
        // Capacity 1 and no started worker consuming: second publish overflows.
        let bus = EventBus::new(EventBusConfig::new().with_queue_capacity(1));
        bus.start(1).unwrap();
        // Park the single worker on a slow handler so the queue backs up.
        bus.subscribe_fn(types::TASK_SCHEDULED, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .unwrap();

        bus.publish(sample_event(types::TASK_SCHEDULED)).await.unwrap();
        // Give the worker a chance to pick up the first event.
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish(sample_event(types::TASK_SCHEDULED)).await.unwrap();

        let err = bus
            .publish(sample_event(types::TASK_SCHEDULED))
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::QueueFull));
        bus.stop();
    }
}
