//! PostgreSQL [`EventStore`] backend.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE events (
//!     id          BIGSERIAL PRIMARY KEY,
//!     event_id    UUID NOT NULL,
//!     stream_id   VARCHAR(255) NOT NULL,
//!     event_type  VARCHAR(255) NOT NULL,
//!     version     BIGINT NOT NULL,
//!     payload     JSONB NOT NULL,
//!     metadata    JSONB NOT NULL,
//!     timestamp   TIMESTAMPTZ NOT NULL,
//!     created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     CONSTRAINT uq_events_event_id UNIQUE (event_id),
//!     CONSTRAINT uq_events_stream_version UNIQUE (stream_id, version)
//! );
//!
//! CREATE INDEX idx_events_stream_id ON events(stream_id);
//! CREATE INDEX idx_events_type ON events(event_type);
//! CREATE INDEX idx_events_timestamp ON events(timestamp);
//! ```
//!
//! # Concurrency
//!
//! `append` reads `MAX(version)` and inserts `MAX + 1` inside a transaction.
//! That read-then-write has a race window; the `uq_events_stream_version`
//! constraint is the actual correctness mechanism. A constraint hit is
//! retried with a fresh version read (bounded attempts, linear backoff)
//! before `ConcurrencyConflict` reaches the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulso_core::event::{Event, EventId, EventType, StreamId};
use pulso_core::store::{EventFilter, EventStore, EventStoreError, EventStream};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::QueryBuilder;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const STREAM_VERSION_CONSTRAINT: &str = "uq_events_stream_version";
const EVENT_ID_CONSTRAINT: &str = "uq_events_event_id";

/// PostgreSQL store configuration.
#[derive(Debug, Clone)]
pub struct PostgresEventStoreConfig {
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// Pool acquire timeout in seconds.
    pub connection_timeout_secs: u64,
    /// Attempts per append before a conflict surfaces to the caller.
    pub append_retries: u32,
    /// Backoff between append attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for PostgresEventStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout_secs: 30,
            append_retries: 3,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

/// Source/correlation metadata stored in the `metadata` JSONB column.
#[derive(Debug, Serialize, Deserialize)]
struct EventMetadata {
    source: String,
    correlation_id: Option<String>,
    causation_id: Option<Uuid>,
}

impl From<&Event> for EventMetadata {
    fn from(event: &Event) -> Self {
        Self {
            source: event.source.clone(),
            correlation_id: event.correlation_id.clone(),
            causation_id: event.causation_id.map(|id| id.0),
        }
    }
}

/// Database row representation of an event.
#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = EventStoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let metadata: EventMetadata = serde_json::from_value(row.metadata)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        Ok(Event {
            id: EventId(row.event_id),
            event_type: EventType::new(row.event_type),
            payload: row.payload,
            source: metadata.source,
            correlation_id: metadata.correlation_id,
            causation_id: metadata.causation_id.map(EventId),
            timestamp: row.timestamp,
        })
    }
}

/// Outcome of one insert attempt inside the retry loop.
enum AppendAttempt {
    Ok(u64),
    VersionTaken(u64),
}

/// A PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    config: PostgresEventStoreConfig,
}

impl PostgresEventStore {
    /// Create a store over an existing pool with default configuration.
    pub fn new(pool: PgPool) -> Self {
        Self::new_with_pool(pool, PostgresEventStoreConfig::default())
    }

    /// Create a store over an existing pool with custom configuration.
    pub fn new_with_pool(pool: PgPool, config: PostgresEventStoreConfig) -> Self {
        Self { pool, config }
    }

    /// Connect and build a pool from a connection string.
    pub async fn connect(
        connection_string: &str,
        config: PostgresEventStoreConfig,
    ) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .connect(connection_string)
            .await
            .map_err(map_sqlx)?;
        Ok(Self::new_with_pool(pool, config))
    }

    /// Current configuration.
    pub fn config(&self) -> &PostgresEventStoreConfig {
        &self.config
    }

    /// Create the schema if it does not exist.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id          BIGSERIAL PRIMARY KEY,
                event_id    UUID NOT NULL,
                stream_id   VARCHAR(255) NOT NULL,
                event_type  VARCHAR(255) NOT NULL,
                version     BIGINT NOT NULL,
                payload     JSONB NOT NULL,
                metadata    JSONB NOT NULL,
                timestamp   TIMESTAMPTZ NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CONSTRAINT uq_events_event_id UNIQUE (event_id),
                CONSTRAINT uq_events_stream_version UNIQUE (stream_id, version)
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_stream_id ON events(stream_id)")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(())
    }

    async fn try_append(
        &self,
        stream_id: &StreamId,
        event: &Event,
        metadata: &serde_json::Value,
    ) -> Result<AppendAttempt, EventStoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE stream_id = $1",
        )
        .bind(stream_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let next = current + 1;

        let inserted = sqlx::query(
            r#"
            INSERT INTO events (event_id, stream_id, event_type, version, payload, metadata, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
        )
        .bind(event.id.0)
        .bind(stream_id.as_str())
        .bind(event.event_type.as_str())
        .bind(next)
        .bind(&event.payload)
        .bind(metadata)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await.map_err(map_sqlx)?;
                Ok(AppendAttempt::Ok(next as u64))
            }
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some(STREAM_VERSION_CONSTRAINT) =>
            {
                Ok(AppendAttempt::VersionTaken(next as u64))
            }
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(EVENT_ID_CONSTRAINT) => {
                Err(EventStoreError::DuplicateEvent(event.id))
            }
            Err(e) => Err(map_sqlx(e)),
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, stream_id: &StreamId, event: &Event) -> Result<u64, EventStoreError> {
        let metadata = serde_json::to_value(EventMetadata::from(event))
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

        let mut last_taken = 0;
        for attempt in 1..=self.config.append_retries {
            match self.try_append(stream_id, event, &metadata).await? {
                AppendAttempt::Ok(version) => {
                    debug!(
                        stream_id = %stream_id,
                        event_id = %event.id,
                        version,
                        "event appended"
                    );
                    return Ok(version);
                }
                AppendAttempt::VersionTaken(version) => {
                    last_taken = version;
                    warn!(
                        stream_id = %stream_id,
                        version,
                        attempt,
                        "append lost the version race"
                    );
                    if attempt < self.config.append_retries {
                        tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    }
                }
            }
        }

        Err(EventStoreError::ConcurrencyConflict {
            stream_id: stream_id.clone(),
            version: last_taken,
        })
    }

    async fn get_stream(
        &self,
        stream_id: &StreamId,
        from_version: u64,
        to_version: Option<u64>,
    ) -> Result<EventStream, EventStoreError> {
        let current = self.current_version(stream_id).await?;
        if current == 0 {
            return Ok(EventStream::empty(stream_id.clone()));
        }

        let upper = to_version.unwrap_or(u64::MAX).min(i64::MAX as u64) as i64;
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, payload, metadata, timestamp
            FROM events
            WHERE stream_id = $1 AND version >= $2 AND version <= $3
            ORDER BY version ASC
        "#,
        )
        .bind(stream_id.as_str())
        .bind(from_version.min(i64::MAX as u64) as i64)
        .bind(upper)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let events = rows
            .into_iter()
            .map(Event::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EventStream {
            stream_id: stream_id.clone(),
            version: current,
            events,
        })
    }

    async fn get_events(&self, filter: EventFilter) -> Result<Vec<Event>, EventStoreError> {
        let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
            "SELECT event_id, event_type, payload, metadata, timestamp FROM events WHERE TRUE",
        );

        if let Some(event_type) = &filter.event_type {
            qb.push(" AND event_type = ");
            qb.push_bind(event_type.as_str().to_string());
        }
        if let Some(from_date) = filter.from_date {
            qb.push(" AND timestamp >= ");
            qb.push_bind(from_date);
        }
        if let Some(to_date) = filter.to_date {
            qb.push(" AND timestamp <= ");
            qb.push_bind(to_date);
        }
        qb.push(" ORDER BY timestamp DESC LIMIT ");
        qb.push_bind(filter.limit.min(i64::MAX as usize) as i64);

        let rows: Vec<EventRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn current_version(&self, stream_id: &StreamId) -> Result<u64, EventStoreError> {
        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE stream_id = $1",
        )
        .bind(stream_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(current as u64)
    }
}

/// Classify sqlx failures into the store error taxonomy.
fn map_sqlx(error: sqlx::Error) -> EventStoreError {
    match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => EventStoreError::Connection(error.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            EventStoreError::Serialization(error.to_string())
        }
        _ => EventStoreError::Backend(error.to_string()),
    }
}
