//! Load shedding at `max_concurrent_operations`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use armgate_core::{Classification, Value};
use tokio::sync::Semaphore;
use tower::{Layer, Service};

use crate::service::operation::{ExecutionRequest, OperationError};
use crate::service::registry::OperationRegistry;

/// Caps in-flight operations at a fixed number of semaphore permits.
///
/// Requests over the cap fail at once with `OVERLOADED`; they never queue
/// here. With a registry attached, foreground operations skip the permits:
/// they are bounded by the gate's wait queue, and queued ones must not
/// crowd out background work.
#[derive(Clone)]
pub struct LoadShedLayer {
    semaphore: Arc<Semaphore>,
    registry: Option<Arc<OperationRegistry>>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            registry: None,
        }
    }

    /// Classifies requests through `registry` so foreground ones are exempt.
    #[must_use]
    pub fn exempt_foreground(mut self, registry: Arc<OperationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            semaphore: self.semaphore.clone(),
            registry: self.registry.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LoadShedService<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
    registry: Option<Arc<OperationRegistry>>,
}

impl<S> LoadShedService<S> {
    fn is_foreground(&self, request: &ExecutionRequest) -> bool {
        self.registry.as_ref().is_some_and(|registry| {
            registry
                .lookup(&request.operation)
                .is_ok_and(|op| op.classification == Classification::Foreground)
        })
    }
}

impl<S> Service<ExecutionRequest> for LoadShedService<S>
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
        if self.is_foreground(&request) {
            return Box::pin(self.inner.call(request));
        }

        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            return Box::pin(async { Err(OperationError::Overloaded) });
        };

        let fut = self.inner.call(request);
        Box::pin(async move {
            let _permit = permit;
            fut.await
        })
    }
}
