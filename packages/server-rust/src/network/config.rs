//! Network configuration for the armgate HTTP endpoint.

use std::time::Duration;

/// Listener and HTTP settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Settings for `/updates` subscribers.
    pub connection: ConnectionConfig,
    /// Allowed CORS origins. `*` allows any.
    pub cors_origins: Vec<String>,
    /// HTTP-level request timeout. Operation timeouts are enforced separately
    /// by the dispatch pipeline; this only bounds the HTTP exchange.
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight operations.
    pub drain_timeout: Duration,
}

impl NetworkConfig {
    /// `host:port` as given, for binding.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            connection: ConnectionConfig::default(),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(120),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-subscriber backpressure settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bounded mpsc channel capacity for outbound frames per subscriber.
    pub outbound_channel_capacity: usize,
    /// Maximum time the write loop waits on a single socket send.
    pub send_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            send_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.cors_origins, vec!["*"]);
        assert_eq!(config.bind_address(), "127.0.0.1:0");
        // Longer than the default operation timeout so the pipeline answers first.
        assert!(config.request_timeout > Duration::from_millis(30_000));
    }

    #[test]
    fn connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.outbound_channel_capacity, 256);
        assert_eq!(config.send_timeout, Duration::from_secs(5));
    }
}
