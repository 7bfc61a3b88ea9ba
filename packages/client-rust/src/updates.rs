//! Following the server's `/updates` WebSocket stream.

use std::collections::BTreeMap;
use std::sync::Arc;

use armgate_core::{decode, OperationStage, RequestId, Update, Value};
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Operation lifecycle notice as received from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationEvent {
    pub request_id: RequestId,
    pub operation: String,
    pub stage: OperationStage,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Callbacks for a subscription. All methods default to no-ops.
///
/// Called from the subscription task; keep them short.
pub trait UpdateDelegate: Send + Sync + 'static {
    /// A controller channel changed. The client cache already holds `value`.
    fn on_value(&self, _name: &str, _value: &Value) {}

    fn on_operation(&self, _event: &OperationEvent) {}

    /// The stream ended, either closed by the server or on a transport error.
    fn on_closed(&self) {}
}

/// A running update subscription. Dropping it stops the stream.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn(
        socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
        values: Arc<RwLock<BTreeMap<String, Value>>>,
        delegate: Arc<dyn UpdateDelegate>,
    ) -> Self {
        let task = tokio::spawn(follow(socket, values, delegate));
        Self { task }
    }

    /// Whether the stream has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the stream and waits for the task to exit.
    pub async fn close(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn follow(
    mut socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    values: Arc<RwLock<BTreeMap<String, Value>>>,
    delegate: Arc<dyn UpdateDelegate>,
) {
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(Message::Binary(bytes)) => match decode::<Update>(&bytes) {
                Ok(update) => apply_update(&values, delegate.as_ref(), update),
                Err(e) => warn!(error = %e, "skipping undecodable update frame"),
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "update stream closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "update stream failed");
                break;
            }
        }
    }
    delegate.on_closed();
}

/// Applies one update to the value cache, then notifies the delegate.
pub(crate) fn apply_update(
    values: &RwLock<BTreeMap<String, Value>>,
    delegate: &dyn UpdateDelegate,
    update: Update,
) {
    match update {
        Update::Values { data } => {
            values
                .write()
                .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            for (name, value) in &data {
                delegate.on_value(name, value);
            }
        }
        Update::Operation {
            request_id,
            operation,
            stage,
            message,
            error,
        } => delegate.on_operation(&OperationEvent {
            request_id,
            operation,
            stage,
            message,
            error,
        }),
    }
}
