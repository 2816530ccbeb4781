//! Event store contract: durable, queryable, versioned log of events.
//!
//! The store is independent of live delivery: nothing in the bus implies
//! persistence, and nothing here implies dispatch to subscribers. Backends
//! must keep per-stream versions contiguous, strictly increasing, and free
//! of duplicates; that contiguity is the basis for event sourcing and for
//! detecting concurrent-write conflicts.
//!
//! Unlike bus dispatch failures, store failures always propagate to the
//! caller: its business logic decides whether to retry an append.

pub mod memory;

use crate::event::{Event, EventId, EventType, StreamId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Default cap on cross-stream query results.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Errors raised by event store operations.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Another writer took the version this append computed. Raised by the
    /// durable backend once its bounded retries are exhausted.
    #[error("concurrency conflict on stream {stream_id} at version {version}")]
    ConcurrencyConflict { stream_id: StreamId, version: u64 },

    /// The event id has already been recorded; event ids are unique
    /// store-wide.
    #[error("event {0} already appended")]
    DuplicateEvent(EventId),

    /// The backing storage is unreachable.
    #[error("store connection error: {0}")]
    Connection(String),

    /// The event payload or metadata could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl EventStoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// An ordered slice of one stream, plus the stream's current version.
///
/// `version` always reports the stream's latest assigned version (the count
/// of appends so far), even when the slice was range-limited; 0 means the
/// stream id is unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStream {
    pub stream_id: StreamId,
    pub version: u64,
    pub events: Vec<Event>,
}

impl EventStream {
    pub fn empty(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            version: 0,
            events: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Filter for cross-stream queries.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    /// Maximum number of events returned; newest first.
    pub limit: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            event_type: None,
            from_date: None,
            to_date: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_from_date(mut self, from_date: DateTime<Utc>) -> Self {
        self.from_date = Some(from_date);
        self
    }

    pub fn with_to_date(mut self, to_date: DateTime<Utc>) -> Self {
        self.to_date = Some(to_date);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Append-only, versioned, queryable log of events.
///
/// # Versioning
///
/// `append` assigns the next version itself: the n-th successful append to a
/// stream returns `n` (1-indexed), with no gaps. Concurrent appenders are
/// made safe by the backend (a unique constraint on `(stream_id, version)`
/// in the durable backend, a write lock in the in-memory one), not by
/// check-then-act in the caller.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event to the named stream and return its assigned version.
    ///
    /// The stream is created implicitly on first append.
    async fn append(&self, stream_id: &StreamId, event: &Event) -> Result<u64, EventStoreError>;

    /// Append several events in order; returns the last assigned version.
    async fn append_batch(
        &self,
        stream_id: &StreamId,
        events: &[Event],
    ) -> Result<u64, EventStoreError> {
        let mut version = self.current_version(stream_id).await?;
        for event in events {
            version = self.append(stream_id, event).await?;
        }
        Ok(version)
    }

    /// Return the requested version range of a stream, ascending, inclusive
    /// on both bounds. Unknown stream ids yield an empty stream.
    async fn get_stream(
        &self,
        stream_id: &StreamId,
        from_version: u64,
        to_version: Option<u64>,
    ) -> Result<EventStream, EventStoreError>;

    /// Cross-stream query: filtered, sorted by timestamp descending (newest
    /// first), capped at the filter's limit.
    async fn get_events(&self, filter: EventFilter) -> Result<Vec<Event>, EventStoreError>;

    /// The stream's latest assigned version; 0 if the stream is unknown.
    async fn current_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError>;

    /// Whether the stream has any events.
    async fn stream_exists(&self, stream_id: &StreamId) -> Result<bool, EventStoreError> {
        Ok(self.current_version(stream_id).await? > 0)
    }
}
