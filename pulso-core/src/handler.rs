//! Handler contract for bus subscribers.
//!
//! A handler is a capability, not a class hierarchy: anything exposing an
//! interest set and an async `handle` qualifies. The bus holds handlers
//! polymorphically behind `Arc<dyn EventHandler>`, keyed by the types they
//! declare interest in.

use crate::event::{Event, EventType};
use async_trait::async_trait;
use std::future::Future;

/// A handler raised an error while processing an event.
///
/// Dispatch failures are caught and logged by the bus workers; they never
/// propagate to the publisher and are not retried.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Capability implemented by anything that wants to react to events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The event types this handler wants delivered.
    fn interest_set(&self) -> Vec<EventType>;

    /// Process one event. Errors are logged and isolated per handler.
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into an [`EventHandler`] for one type.
///
/// The closure receives an owned clone of the event so it can move it into
/// spawned work without borrowing from the dispatch loop.
pub struct FnHandler<F> {
    event_type: EventType,
    callback: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    pub fn new(event_type: EventType, callback: F) -> Self {
        Self {
            event_type,
            callback,
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn interest_set(&self) -> Vec<EventType> {
        vec![self.event_type.clone()]
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.callback)(event.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = FnHandler::new(types::TASK_COMPLETED, move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let event = Event::new(types::TASK_COMPLETED, json!({}), "scheduler");
        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(handler.interest_set(), vec![types::TASK_COMPLETED]);
    }

    #[tokio::test]
    async fn test_fn_handler_surfaces_errors() {
        let handler = FnHandler::new(types::SYSTEM_ALERT, |_event| async {
            Err(HandlerError::new("downstream unavailable"))
        });

        let event = Event::new(types::SYSTEM_ALERT, json!({}), "monitor");
        let err = handler.handle(&event).await.unwrap_err();
        assert!(err.to_string().contains("downstream"));
    }
}
