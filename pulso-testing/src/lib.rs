//! # pulso-testing
//!
//! Container-backed harnesses for integration tests: a PostgreSQL instance
//! for the durable event store and a JetStream-enabled NATS server for the
//! broker transport. Containers are torn down on drop.
//!
//! Requires a working Docker environment at test time.

mod nats;
mod postgres;

pub use nats::TestNats;
pub use postgres::TestPostgres;

/// Failures while bringing up or talking to a test container.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("container error: {0}")]
    Container(#[from] testcontainers::TestcontainersError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Broker(String),
}
