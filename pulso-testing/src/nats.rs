//! NATS test harness with JetStream enabled.

use crate::HarnessError;
use std::time::Duration;
use testcontainers::core::WaitFor;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// A throwaway NATS server running with `-js`.
pub struct TestNats {
    _container: ContainerAsync<GenericImage>,
    url: String,
}

impl TestNats {
    /// Start a container and wait until the server accepts connections.
    pub async fn start() -> Result<Self, HarnessError> {
        let container = GenericImage::new("nats", "2.10-alpine")
            .with_wait_for(WaitFor::message_on_stderr("Server is ready"))
            .with_cmd(["-js"])
            .start()
            .await?;

        let port = container.get_host_port_ipv4(4222).await?;
        let url = format!("nats://127.0.0.1:{port}");

        // The readiness log can precede the listener by a moment.
        let client = retry_connect(&url).await?;
        drop(client);

        Ok(Self {
            _container: container,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a fresh client connection to the test server.
    pub async fn client(&self) -> Result<async_nats::Client, HarnessError> {
        retry_connect(&self.url).await
    }
}

/// Retry connecting with exponential backoff.
async fn retry_connect(url: &str) -> Result<async_nats::Client, HarnessError> {
    let max_attempts = 8;
    for attempt in 1..=max_attempts {
        match async_nats::connect(url).await {
            Ok(client) => return Ok(client),
            Err(e) if attempt == max_attempts => {
                return Err(HarnessError::Broker(e.to_string()));
            }
            Err(_) => {
                tokio::time::sleep(Duration::from_millis(100 * 2_u64.pow(attempt))).await;
            }
        }
    }
    unreachable!("retry loop returns before exhausting attempts")
}
