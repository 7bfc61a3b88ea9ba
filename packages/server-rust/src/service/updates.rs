//! Update stream publisher.
//!
//! Encodes [`Update`] frames once and fans them out to every `/updates`
//! subscriber through the connection registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use armgate_core::{encode, OperationStage, RequestId, Update, Value};
use bytes::Bytes;
use tracing::{trace, warn};

use crate::network::ConnectionRegistry;

/// Cheap-to-clone handle for pushing updates to subscribers.
///
/// Publishing never blocks: subscribers whose outbound channel is full miss
/// the frame. With no subscribers, publishing only costs the encode.
#[derive(Debug, Clone)]
pub struct UpdatePublisher {
    connections: Arc<ConnectionRegistry>,
}

impl UpdatePublisher {
    #[must_use]
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    /// Encodes and broadcasts a single frame.
    pub fn publish(&self, update: &Update) {
        if self.connections.count() == 0 {
            return;
        }
        match encode(update) {
            Ok(bytes) => {
                let subscribers = self.connections.count();
                let delivered = self.connections.broadcast(&Bytes::from(bytes));
                if delivered < subscribers {
                    trace!(delivered, subscribers, "update skipped backed-up subscribers");
                }
            }
            Err(e) => warn!(error = %e, "dropping unencodable update"),
        }
    }

    /// Publishes an operation lifecycle frame.
    pub fn operation(
        &self,
        request_id: RequestId,
        operation: &str,
        stage: OperationStage,
        message: Option<String>,
        error: Option<String>,
    ) {
        self.publish(&Update::Operation {
            request_id,
            operation: operation.to_string(),
            stage,
            message,
            error,
        });
    }

    /// Publishes changed controller channels. Empty maps are not sent.
    pub fn values(&self, data: BTreeMap<String, Value>) {
        if data.is_empty() {
            return;
        }
        self.publish(&Update::Values { data });
    }
}

#[cfg(test)]
mod tests {
    use armgate_core::decode;

    use super::*;
    use crate::network::{ConnectionConfig, OutboundMessage};

    #[test]
    fn publishes_to_every_subscriber() {
        let connections = Arc::new(ConnectionRegistry::new());
        let config = ConnectionConfig::default();
        let (_a, mut rx_a) = connections.register(&config);
        let (_b, mut rx_b) = connections.register(&config);

        let publisher = UpdatePublisher::new(Arc::clone(&connections));
        publisher.operation(RequestId(9), "calibrate", OperationStage::Start, None, None);

        for rx in [&mut rx_a, &mut rx_b] {
            let Ok(OutboundMessage::Binary(bytes)) = rx.try_recv() else {
                panic!("expected a binary frame");
            };
            let update: Update = decode(&bytes).unwrap();
            assert!(matches!(
                update,
                Update::Operation {
                    request_id: RequestId(9),
                    stage: OperationStage::Start,
                    ..
                }
            ));
        }
    }

    #[test]
    fn empty_values_are_not_sent() {
        let connections = Arc::new(ConnectionRegistry::new());
        let (_h, mut rx) = connections.register(&ConnectionConfig::default());

        let publisher = UpdatePublisher::new(connections);
        publisher.values(BTreeMap::new());
        assert!(rx.try_recv().is_err());

        let mut data = BTreeMap::new();
        data.insert("motors_on".to_string(), Value::from(true));
        publisher.values(data);
        assert!(rx.try_recv().is_ok());
    }
}
