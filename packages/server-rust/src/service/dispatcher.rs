//! Operation dispatch: registry lookup, gate policy, handler invocation.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use armgate_core::{Classification, OperationFailure, OperationStage, RequestId, Value};
use futures_util::FutureExt;
use tower::Service;
use tracing::{debug, error, warn};

use super::config::BusyPolicy;
use super::gate::{ExclusionGate, GateError, GateGuard, GateOwner};
use super::operation::{DomainError, ExecutionRequest, HandlerContext, Operation, OperationError};
use super::registry::OperationRegistry;
use super::updates::UpdatePublisher;
use crate::controller::Controller;

impl From<GateError> for OperationError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::ShuttingDown => Self::ShuttingDown,
            GateError::Busy { holder } => Self::Busy {
                holder: holder.to_string(),
            },
            GateError::QueueFull { .. } => Self::Overloaded,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct DispatcherInner {
    registry: Arc<OperationRegistry>,
    gate: ExclusionGate,
    controller: Arc<dyn Controller>,
    updates: UpdatePublisher,
    busy_policy: BusyPolicy,
}

/// Runs one `ExecutionRequest` to completion.
///
/// Background operations run immediately and concurrently. Foreground
/// operations first take the [`ExclusionGate`], so at most one runs at a time,
/// granted in arrival order. Handler failures and panics become
/// `OperationError::Domain`; the server keeps running.
///
/// Cheap to clone; also usable directly as a `tower::Service<ExecutionRequest>`.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<OperationRegistry>,
        gate: ExclusionGate,
        controller: Arc<dyn Controller>,
        updates: UpdatePublisher,
        busy_policy: BusyPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                gate,
                controller,
                updates,
                busy_policy,
            }),
        }
    }

    #[must_use]
    pub fn gate(&self) -> &ExclusionGate {
        &self.inner.gate
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.inner.registry
    }

    /// Dispatches one request.
    ///
    /// Dropping the returned future (e.g. on timeout) cancels the handler and
    /// releases the gate if it was held.
    ///
    /// # Errors
    ///
    /// - `UnknownOperation` if nothing is registered under the name (the gate is not touched)
    /// - `Domain` if the handler fails or panics
    /// - `ShuttingDown` if the gate closed while waiting
    /// - `Busy` under `BusyPolicy::Reject` when the gate is held
    /// - `Overloaded` when the gate's wait queue is full
    pub async fn dispatch(&self, request: ExecutionRequest) -> Result<Value, OperationError> {
        let operation = self.inner.registry.lookup(&request.operation)?;
        debug!(
            operation = %operation.name,
            request_id = %request.request_id,
            classification = operation.classification.as_str(),
            "dispatching"
        );

        match operation.classification {
            Classification::Background => self.invoke(&operation, request).await,
            Classification::Foreground => {
                let _guard = self.enter_gate(&operation, &request).await?;
                self.invoke(&operation, request).await
            }
        }
    }

    async fn enter_gate(
        &self,
        operation: &Operation,
        request: &ExecutionRequest,
    ) -> Result<GateGuard, GateError> {
        let owner = GateOwner {
            request_id: request.request_id,
            client_id: request.client_id.clone(),
            operation: Arc::clone(&operation.name),
        };
        let started = Instant::now();
        let guard = match self.inner.busy_policy {
            BusyPolicy::Queue => self.inner.gate.acquire(owner).await?,
            BusyPolicy::Reject => self.inner.gate.try_acquire(owner)?,
        };
        metrics::histogram!("armgate_gate_wait_seconds").record(started.elapsed().as_secs_f64());
        Ok(guard)
    }

    async fn invoke(
        &self,
        operation: &Operation,
        request: ExecutionRequest,
    ) -> Result<Value, OperationError> {
        let updates = &self.inner.updates;
        let ctx = HandlerContext::new(&request, Arc::clone(&self.inner.controller), updates.clone());
        let notice = EndNotice::start(updates.clone(), request.request_id, Arc::clone(&operation.name));

        let outcome = AssertUnwindSafe(operation.handler.call(ctx, request.arguments))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(domain)) => {
                warn!(
                    operation = %operation.name,
                    request_id = %request.request_id,
                    error = %domain,
                    "operation failed"
                );
                Err(OperationError::Domain(domain))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    operation = %operation.name,
                    request_id = %request.request_id,
                    panic = %message,
                    "operation panicked"
                );
                Err(DomainError::new(format!("operation panicked: {message}")).into())
            }
        };
        notice.finish(&result);
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Short human-readable rendering of a result value for `End` frames.
fn describe(value: &Value) -> Option<String> {
    match value {
        Value::Nil => None,
        Value::String(s) => s.as_str().map(ToString::to_string),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// EndNotice
// ---------------------------------------------------------------------------

/// Publishes `Start` on creation and exactly one `End` when the invocation
/// finishes or its future is dropped.
struct EndNotice {
    updates: UpdatePublisher,
    request_id: RequestId,
    operation: Arc<str>,
    finished: bool,
}

impl EndNotice {
    fn start(updates: UpdatePublisher, request_id: RequestId, operation: Arc<str>) -> Self {
        updates.operation(request_id, &operation, OperationStage::Start, None, None);
        Self {
            updates,
            request_id,
            operation,
            finished: false,
        }
    }

    fn finish(mut self, result: &Result<Value, OperationError>) {
        let (message, error) = match result {
            Ok(value) => (describe(value), None),
            Err(err) => (None, Some(domain_or_display(err))),
        };
        self.updates.operation(
            self.request_id,
            &self.operation,
            OperationStage::End,
            message,
            error,
        );
        self.finished = true;
    }
}

impl Drop for EndNotice {
    fn drop(&mut self) {
        if !self.finished {
            self.updates.operation(
                self.request_id,
                &self.operation,
                OperationStage::End,
                None,
                Some("operation aborted".to_string()),
            );
        }
    }
}

fn domain_or_display(err: &OperationError) -> String {
    match err {
        OperationError::Domain(domain) => domain.message.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// tower::Service
// ---------------------------------------------------------------------------

impl Service<ExecutionRequest> for Dispatcher {
    type Response = Value;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<Value, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ExecutionRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { this.dispatch(request).await })
    }
}

/// Converts a finished dispatch into its wire form.
#[must_use]
pub fn into_execution_result(result: Result<Value, OperationError>) -> armgate_core::ExecutionResult {
    result.map_err(OperationFailure::from)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
