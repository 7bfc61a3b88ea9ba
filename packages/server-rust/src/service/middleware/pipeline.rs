//! Pipeline composition: combines all middleware layers into a single service stack.

use std::sync::Arc;

use armgate_core::Value;
use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::ServerConfig;
use crate::service::dispatcher::Dispatcher;
use crate::service::operation::{ExecutionRequest, OperationError};

/// The type-erased, cloneable request pipeline handed to the HTTP layer.
pub type DispatchPipeline = BoxCloneService<ExecutionRequest, Value, OperationError>;

/// Build the dispatch pipeline by wrapping the `Dispatcher` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject background work when overloaded; foreground
///    requests are bounded by the gate's wait queue instead
/// 2. `TimeoutLayer` -- enforce per-request timeouts, gate wait included
/// 3. `MetricsLayer` -- record timing and outcome (closest to the dispatcher)
#[must_use]
pub fn build_dispatch_pipeline(dispatcher: Dispatcher, config: &ServerConfig) -> DispatchPipeline {
    let service = ServiceBuilder::new()
        .layer(
            LoadShedLayer::new(config.max_concurrent_operations)
                .exempt_foreground(Arc::clone(dispatcher.registry())),
        )
        .layer(TimeoutLayer)
        .layer(MetricsLayer)
        .service(dispatcher);
    BoxCloneService::new(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
