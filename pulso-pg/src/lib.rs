//! # pulso-pg
//!
//! PostgreSQL backend for the [`pulso_core::EventStore`] contract.
//!
//! Versioning correctness rests on the database, not on in-process locks:
//! the `UNIQUE (stream_id, version)` constraint rejects racing appends, and
//! the store retries a bounded number of times before surfacing
//! [`pulso_core::EventStoreError::ConcurrencyConflict`]. That is what makes
//! concurrent appenders across processes safe.

mod event_store;

pub use event_store::{PostgresEventStore, PostgresEventStoreConfig};
