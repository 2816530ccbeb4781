//! In-memory implementation of [`EventStore`].
//!
//! Thread-safe and fully contract-conformant without a database: appends
//! serialize under a write lock, so versions are contiguous by construction
//! and the backend never raises a concurrency conflict. Nothing survives a
//! restart. Suited to tests, development, and single-process deployments.

use super::{EventFilter, EventStore, EventStoreError, EventStream};
use crate::event::{Event, EventId, StreamId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct StoreState {
    /// Events per stream, in append (= version) order.
    streams: HashMap<StreamId, Vec<Event>>,
    /// Flat list of every appended event, for cross-stream queries.
    all_events: Vec<Event>,
    /// Store-wide event-id uniqueness, mirroring the durable backend's
    /// `event_id UNIQUE` constraint.
    seen_ids: HashSet<EventId>,
}

/// In-memory event store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: RwLock<StoreState>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all streams and events.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.streams.clear();
        state.all_events.clear();
        state.seen_ids.clear();
    }

    /// Number of streams with at least one event.
    pub fn stream_count(&self) -> usize {
        self.state.read().streams.len()
    }

    /// Total number of events across all streams.
    pub fn event_count(&self) -> usize {
        self.state.read().all_events.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream_id: &StreamId, event: &Event) -> Result<u64, EventStoreError> {
        let mut state = self.state.write();

        if !state.seen_ids.insert(event.id) {
            return Err(EventStoreError::DuplicateEvent(event.id));
        }

        let stream = state.streams.entry(stream_id.clone()).or_default();
        stream.push(event.clone());
        let version = stream.len() as u64;

        state.all_events.push(event.clone());
        Ok(version)
    }

    async fn get_stream(
        &self,
        stream_id: &StreamId,
        from_version: u64,
        to_version: Option<u64>,
    ) -> Result<EventStream, EventStoreError> {
        let state = self.state.read();

        let Some(events) = state.streams.get(stream_id) else {
            return Ok(EventStream::empty(stream_id.clone()));
        };

        let current = events.len() as u64;
        let upper = to_version.unwrap_or(u64::MAX);
        let selected = events
            .iter()
            .enumerate()
            .filter(|(index, _)| {
                let version = *index as u64 + 1;
                version >= from_version && version <= upper
            })
            .map(|(_, event)| event.clone())
            .collect();

        Ok(EventStream {
            stream_id: stream_id.clone(),
            version: current,
            events: selected,
        })
    }

    async fn get_events(&self, filter: EventFilter) -> Result<Vec<Event>, EventStoreError> {
        let state = self.state.read();

        let mut matched: Vec<Event> = state
            .all_events
            .iter()
            .filter(|event| {
                filter
                    .event_type
                    .as_ref()
                    .is_none_or(|wanted| &event.event_type == wanted)
                    && filter.from_date.is_none_or(|from| event.timestamp >= from)
                    && filter.to_date.is_none_or(|to| event.timestamp <= to)
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(filter.limit);
        Ok(matched)
    }

    async fn current_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        let state = self.state.read();
        Ok(state
            .streams
            .get(stream_id)
            .map(|events| events.len() as u64)
            .unwrap_or(0))
    }
}
