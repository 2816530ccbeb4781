//! Tracing bootstrap for services embedding the event core.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to log lines.
    pub service_name: String,
    /// Log level filter, `EnvFilter` syntax.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "pulso".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Keep alive for the lifetime of the process.
pub struct TelemetryGuard;

impl TelemetryGuard {
    pub fn shutdown(self) {}
}

/// Install the global tracing subscriber.
///
/// Call once at application startup; a second call panics because the global
/// subscriber is already set.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::new(&config.log_level);

    Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::debug!(service = %config.service_name, "telemetry initialized");
    TelemetryGuard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "pulso");
        assert_eq!(config.log_level, "info");
    }
}
