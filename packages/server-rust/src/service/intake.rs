//! Request intake: turns wire `OperationRequest`s into `ExecutionRequest`s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use armgate_core::{OperationRequest, RequestId};

use super::config::ServerConfig;
use super::operation::ExecutionRequest;

/// Assigns request ids and resolves the effective timeout.
///
/// Ids are unique for the life of the process and start at 1. Effective
/// timeouts never exceed `max_timeout_ms`, so the pipeline always answers
/// before the HTTP exchange is cut.
#[derive(Debug)]
pub struct RequestIntake {
    next_id: AtomicU64,
    default_timeout_ms: u64,
    max_timeout_ms: u64,
}

impl RequestIntake {
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            default_timeout_ms: config.default_operation_timeout_ms,
            max_timeout_ms: config.max_operation_timeout_ms.max(1),
        }
    }

    /// Lowers the ceiling to nine tenths of `exchange`, the HTTP request
    /// timeout, leaving the rest for encoding and sending the reply.
    #[must_use]
    pub fn within_exchange(mut self, exchange: Duration) -> Self {
        let exchange_ms = u64::try_from(exchange.as_millis()).unwrap_or(u64::MAX);
        let ceiling = (exchange_ms - exchange_ms / 10).max(1);
        self.max_timeout_ms = self.max_timeout_ms.min(ceiling);
        self
    }

    #[must_use]
    pub fn max_timeout_ms(&self) -> u64 {
        self.max_timeout_ms
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Admits a request. A zero or missing client timeout falls back to the
    /// default; either is clamped to the ceiling.
    #[must_use]
    pub fn admit(&self, request: OperationRequest) -> ExecutionRequest {
        let timeout_ms = request
            .timeout_ms
            .filter(|ms| *ms > 0)
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms);

        ExecutionRequest {
            request_id: self.next_request_id(),
            operation: request.operation,
            arguments: request.arguments,
            client_id: request.client_id,
            timeout_ms,
        }
    }
}
