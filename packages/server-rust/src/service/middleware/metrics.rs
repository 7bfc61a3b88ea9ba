//! Metrics middleware for operations.
//!
//! Wraps each request in an `operation` span, logs its outcome and records
//! `armgate_operations_total` / `armgate_operation_duration_seconds` through
//! the `metrics` facade. No recorder is installed here; without one the
//! macros are no-ops.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use armgate_core::Value;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{ExecutionRequest, OperationError};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records request duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Label for a finished request: `ok` or the wire error kind.
fn outcome_label(result: &Result<Value, OperationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(err) => err.kind().as_str(),
    }
}

impl<S> Service<ExecutionRequest> for MetricsService<S>
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
        let operation = request.operation.clone();
        let request_id = request.request_id.0;

        let span = info_span!(
            "operation",
            operation = %operation,
            request_id = request_id,
            client_id = request.client_id.as_deref().unwrap_or("-"),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(request);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome_label(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    "armgate_operations_total",
                    "operation" => operation.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!("armgate_operation_duration_seconds", "operation" => operation.clone())
                    .record(elapsed.as_secs_f64());

                tracing::info!(
                    operation = %operation,
                    request_id = request_id,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "operation complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
