//! Operation client: one HTTP round trip per call.

use std::collections::BTreeMap;
use std::sync::Arc;

use armgate_core::{
    decode, encode, Arguments, OperationInfo, OperationReply, OperationRequest, Value,
};
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::updates::{Subscription, UpdateDelegate};

const MSGPACK: &str = "application/msgpack";

/// Runs operations on an armgate server.
///
/// Calls made through one client are serialized: a second `run_operation`
/// waits until the first has its reply. Use separate clients for
/// concurrent calls. Failed calls are never retried.
pub struct OperationClient {
    config: ClientConfig,
    http: reqwest::Client,
    call_lock: Mutex<()>,
    values: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl OperationClient {
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            config,
            http,
            call_lock: Mutex::new(()),
            values: Arc::new(RwLock::new(BTreeMap::new())),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Runs `operation` with `arguments` and waits for its result.
    ///
    /// # Errors
    ///
    /// - `ClientError::Operation` with the server's kind and message when the operation failed
    /// - `ClientError::Transport` when no reply arrived
    /// - `ClientError::Codec` / `UnexpectedStatus` when the reply was unreadable
    pub async fn run_operation(
        &self,
        operation: &str,
        arguments: Arguments,
    ) -> Result<Value, ClientError> {
        self.call(OperationRequest::new(operation, arguments)).await
    }

    /// Like [`run_operation`](Self::run_operation) with a per-call server-side timeout.
    ///
    /// # Errors
    ///
    /// As for `run_operation`; an expired timeout is a `TIMEOUT` operation error.
    pub async fn run_operation_with_timeout(
        &self,
        operation: &str,
        arguments: Arguments,
        timeout_ms: u64,
    ) -> Result<Value, ClientError> {
        let mut request = OperationRequest::new(operation, arguments);
        request.timeout_ms = Some(timeout_ms);
        self.call(request).await
    }

    async fn call(&self, mut request: OperationRequest) -> Result<Value, ClientError> {
        request.client_id = Some(self.config.client_id.clone());
        let body = encode(&request)?;

        let _serialized = self.call_lock.lock().await;
        debug!(operation = %request.operation, "sending operation request");

        let response = self
            .http
            .post(self.config.operations_url())
            .header(CONTENT_TYPE, MSGPACK)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        // Rejections carry a reply body too, so decode before looking at the status.
        let reply: OperationReply = match decode(&bytes) {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(ClientError::UnexpectedStatus {
                    status: status.as_u16(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            operation = %request.operation,
            request_id = ?reply.request_id,
            ok = reply.result.is_ok(),
            "operation reply received"
        );
        reply.result.map_err(ClientError::from)
    }

    /// Fetches every controller channel through the built-in `refresh`
    /// operation and replaces the local cache with it.
    ///
    /// # Errors
    ///
    /// As for `run_operation`, plus `UnexpectedValue` if the reply is not a map.
    pub async fn refresh(&self) -> Result<BTreeMap<String, Value>, ClientError> {
        let value = self.run_operation("refresh", Arguments::new()).await?;
        let entries = match value {
            Value::Map(entries) => entries,
            other => {
                return Err(ClientError::UnexpectedValue(format!(
                    "refresh returned {other}"
                )))
            }
        };

        let snapshot: BTreeMap<String, Value> = entries
            .into_iter()
            .filter_map(|(k, v)| k.as_str().map(|name| (name.to_string(), v)))
            .collect();
        *self.values.write() = snapshot.clone();
        Ok(snapshot)
    }

    /// Lists the operations registered on the server.
    ///
    /// # Errors
    ///
    /// As for `run_operation`, plus `UnexpectedValue` if the listing is malformed.
    pub async fn operations(&self) -> Result<Vec<OperationInfo>, ClientError> {
        let value = self.run_operation("operations", Arguments::new()).await?;
        rmpv::ext::from_value(value).map_err(|e| ClientError::UnexpectedValue(e.to_string()))
    }

    /// Cached value of one controller channel, as of the last `refresh` or
    /// stream update.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Value> {
        self.values.read().get(name).cloned()
    }

    #[must_use]
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.values.read().clone()
    }

    /// Opens the update stream. `Values` updates are merged into the cache
    /// before `delegate` hears about them.
    ///
    /// The server sends a full snapshot right after the connection opens.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the WebSocket handshake fails.
    pub async fn subscribe_updates(
        &self,
        delegate: Arc<dyn UpdateDelegate>,
    ) -> Result<Subscription, ClientError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.config.updates_url()).await?;
        debug!(url = %self.config.updates_url(), "update stream connected");
        Ok(Subscription::spawn(socket, Arc::clone(&self.values), delegate))
    }
}

impl std::fmt::Debug for OperationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationClient")
            .field("base_url", &self.config.base_url)
            .field("client_id", &self.config.client_id)
            .finish_non_exhaustive()
    }
}
