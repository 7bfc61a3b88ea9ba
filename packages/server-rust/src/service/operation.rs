//! Operation, handler, and request types flowing through the dispatch pipeline.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use armgate_core::{
    Arguments, Classification, ErrorKind, OperationFailure, OperationStage, RequestId, Value,
};
use async_trait::async_trait;

use super::updates::UpdatePublisher;
use crate::controller::{Controller, ControllerError};

// ---------------------------------------------------------------------------
// DomainError
// ---------------------------------------------------------------------------

/// Business-rule failure raised by a handler, e.g. "Motors must be on".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DomainError {
    pub message: String,
}

impl DomainError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ControllerError> for DomainError {
    fn from(err: ControllerError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<anyhow::Error> for DomainError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// What a handler returns.
pub type HandlerResult = Result<Value, DomainError>;

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Everything a handler may touch besides its arguments.
#[derive(Clone)]
pub struct HandlerContext {
    pub request_id: RequestId,
    pub client_id: Option<String>,
    pub operation: Arc<str>,
    controller: Arc<dyn Controller>,
    updates: UpdatePublisher,
}

impl HandlerContext {
    pub(crate) fn new(
        request: &ExecutionRequest,
        controller: Arc<dyn Controller>,
        updates: UpdatePublisher,
    ) -> Self {
        Self {
            request_id: request.request_id,
            client_id: request.client_id.clone(),
            operation: Arc::from(request.operation.as_str()),
            controller,
            updates,
        }
    }

    /// The controller handle. Opaque to the core; handlers own its semantics.
    #[must_use]
    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }

    /// Shared handle to the controller, for handlers that spawn work.
    #[must_use]
    pub fn controller_arc(&self) -> Arc<dyn Controller> {
        Arc::clone(&self.controller)
    }

    /// Publishes an intermediate progress message for this request.
    pub fn progress(&self, message: impl Into<String>) {
        self.updates.operation(
            self.request_id,
            &self.operation,
            OperationStage::Update,
            Some(message.into()),
            None,
        );
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("request_id", &self.request_id)
            .field("client_id", &self.client_id)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// OperationHandler
// ---------------------------------------------------------------------------

/// Application-supplied implementation of one operation.
///
/// Implemented for any `Fn(HandlerContext, Arguments) -> impl Future<Output = HandlerResult>`,
/// so plain async closures and functions register directly.
#[async_trait]
pub trait OperationHandler: Send + Sync + 'static {
    async fn call(&self, ctx: HandlerContext, args: Arguments) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> OperationHandler for F
where
    F: Fn(HandlerContext, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, ctx: HandlerContext, args: Arguments) -> HandlerResult {
        (self)(ctx, args).await
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A registered operation. Immutable once registered; cheap to clone.
#[derive(Clone)]
pub struct Operation {
    pub name: Arc<str>,
    pub classification: Classification,
    pub handler: Arc<dyn OperationHandler>,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("classification", &self.classification)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ExecutionRequest
// ---------------------------------------------------------------------------

/// One invocation, owned by the dispatcher for its lifetime.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub request_id: RequestId,
    pub operation: String,
    pub arguments: Arguments,
    pub client_id: Option<String>,
    pub timeout_ms: u64,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(request_id: RequestId, operation: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            request_id,
            operation: operation.into(),
            arguments,
            client_id: None,
            timeout_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// OperationError
// ---------------------------------------------------------------------------

/// Dispatch-time failure, returned to the endpoint instead of faulting the server.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("operation does not exist: {name}")]
    UnknownOperation { name: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("server shutting down")]
    ShuttingDown,
    #[error("busy: foreground held by {holder}")]
    Busy { holder: String },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// Wire category for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            Self::Domain(_) => ErrorKind::DomainError,
            Self::ShuttingDown => ErrorKind::ServerShuttingDown,
            Self::Busy { .. } => ErrorKind::Busy,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Overloaded => ErrorKind::Overloaded,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<OperationError> for OperationFailure {
    fn from(err: OperationError) -> Self {
        // Domain errors travel with the handler's message verbatim.
        let message = match &err {
            OperationError::Domain(domain) => domain.message.clone(),
            other => other.to_string(),
        };
        OperationFailure::new(err.kind(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_error_keeps_message_verbatim_on_the_wire() {
        let failure: OperationFailure =
            OperationError::from(DomainError::new("Motors must be on")).into();
        assert_eq!(failure.kind, ErrorKind::DomainError);
        assert_eq!(failure.message, "Motors must be on");
    }

    #[test]
    fn error_kinds_map_one_to_one() {
        let cases = [
            (
                OperationError::UnknownOperation { name: "x".into() },
                ErrorKind::UnknownOperation,
            ),
            (OperationError::ShuttingDown, ErrorKind::ServerShuttingDown),
            (
                OperationError::Busy { holder: "calibrate".into() },
                ErrorKind::Busy,
            ),
            (OperationError::Timeout { timeout_ms: 5 }, ErrorKind::Timeout),
            (OperationError::Overloaded, ErrorKind::Overloaded),
            (
                OperationError::Internal(anyhow::anyhow!("boom")),
                ErrorKind::Internal,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn unknown_operation_message_names_the_operation() {
        let failure: OperationFailure = OperationError::UnknownOperation {
            name: "does_not_exist".into(),
        }
        .into();
        assert_eq!(failure.message, "operation does not exist: does_not_exist");
    }

    #[test]
    fn controller_errors_become_domain_errors() {
        let err: DomainError = ControllerError::Busy.into();
        assert_eq!(err.message, "busy");
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        use crate::controller::SimulatedController;
        use crate::network::ConnectionRegistry;

        let handler = |_ctx: HandlerContext, args: Arguments| async move {
            Ok::<_, DomainError>(Value::from(args.positional.len()))
        };
        let request = ExecutionRequest::new(RequestId(1), "count", Arguments::new().arg(1).arg(2));
        let ctx = HandlerContext::new(
            &request,
            Arc::new(SimulatedController::new()),
            UpdatePublisher::new(Arc::new(ConnectionRegistry::new())),
        );

        let value = OperationHandler::call(&handler, ctx, request.arguments.clone())
            .await
            .unwrap();
        assert_eq!(value, Value::from(2_u64));
    }
}
