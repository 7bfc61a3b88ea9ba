//! Timeout middleware for operations.
//!
//! Fails requests that exceed their `timeout_ms` with `OperationError::Timeout`.
//! The inner future is dropped on expiry, which releases the gate if it was held.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use armgate_core::Value;
use tower::{Layer, Service};

use crate::service::operation::{ExecutionRequest, OperationError};

/// Enforces each request's own `timeout_ms`, which intake has already
/// defaulted from the server configuration.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<ExecutionRequest> for TimeoutService<S>
where
    S: Service<ExecutionRequest, Response = Value, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: ExecutionRequest) -> Self::Future {
        let timeout_ms = request.timeout_ms;
        let call = tokio::time::timeout(Duration::from_millis(timeout_ms), self.inner.call(request));
        Box::pin(async move {
            call.await
                .unwrap_or(Err(OperationError::Timeout { timeout_ms }))
        })
    }
}
