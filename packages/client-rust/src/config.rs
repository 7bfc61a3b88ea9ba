//! Client configuration.

use std::time::Duration;

use uuid::Uuid;

/// Where the server lives and how long a single call may take.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. `http://127.0.0.1:8876`. A trailing slash is ignored.
    pub base_url: String,
    /// Upper bound on one HTTP exchange. Keep it above the server's
    /// operation timeout so the server's `TIMEOUT` reply arrives first.
    pub request_timeout: Duration,
    /// Sent with every request; shows up in server logs and gate status.
    pub client_id: String,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub(crate) fn operations_url(&self) -> String {
        format!("{}/operations", self.root())
    }

    /// The `/updates` endpoint with the scheme swapped to `ws`/`wss`.
    pub(crate) fn updates_url(&self) -> String {
        let root = self.root();
        let ws_root = if let Some(rest) = root.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = root.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            root.to_string()
        };
        format!("{ws_root}/updates")
    }

    fn root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8876".to_string(),
            request_timeout: Duration::from_secs(120),
            client_id: Uuid::new_v4().to_string(),
        }
    }
}
