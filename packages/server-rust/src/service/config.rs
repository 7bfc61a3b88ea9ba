use std::time::Duration;

/// What a foreground request does when the gate is already held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Wait in FIFO order for the holder to release.
    #[default]
    Queue,
    /// Fail immediately with `Busy`.
    Reject,
}

impl std::str::FromStr for BusyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown busy policy: {other}")),
        }
    }
}

/// Server-level configuration for the dispatch pipeline.
///
/// Controls operation timeouts, concurrency limits, and the values poll interval.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name reported by `/health` and in the startup log.
    pub node_name: String,
    /// Timeout applied when a request does not carry its own, in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Upper bound on any operation timeout, client-supplied or default.
    pub max_operation_timeout_ms: u64,
    /// Maximum number of in-flight background operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Maximum number of foreground requests queued on the gate before
    /// further ones are shed.
    pub max_queued_foreground: usize,
    /// Interval between controller channel polls in milliseconds.
    pub values_poll_interval_ms: u64,
    pub busy_policy: BusyPolicy,
}

impl ServerConfig {
    #[must_use]
    pub fn values_poll_interval(&self) -> Duration {
        Duration::from_millis(self.values_poll_interval_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_name: "armgate".to_string(),
            default_operation_timeout_ms: 30_000,
            max_operation_timeout_ms: 600_000,
            max_concurrent_operations: 1000,
            max_queued_foreground: 64,
            values_poll_interval_ms: 500,
            busy_policy: BusyPolicy::Queue,
        }
    }
}
