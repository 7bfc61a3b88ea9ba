//! HTTP and WebSocket handler definitions for the armgate server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod operations;
pub mod updates;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use operations::operations_handler;
pub use updates::updates_handler;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{ConnectionRegistry, NetworkConfig, ShutdownController};
use crate::service::{
    DispatchPipeline, ExclusionGate, OperationRegistry, RequestIntake, ValuesTask, WorkerHandle,
};

/// Operation-side state the handlers need, assembled by `ServerContext`.
#[derive(Clone)]
pub struct DispatchState {
    /// The middleware-wrapped dispatcher. `BoxCloneService` is `Send` but not
    /// `Sync`, so handlers clone it out from under the lock per request.
    pub pipeline: Arc<Mutex<DispatchPipeline>>,
    pub intake: Arc<RequestIntake>,
    pub gate: ExclusionGate,
    pub registry: Arc<OperationRegistry>,
    /// Values poller, asked to resync whenever a subscriber connects.
    pub values: Option<WorkerHandle<ValuesTask>>,
    pub node_name: Arc<str>,
}

impl DispatchState {
    /// Clone of the pipeline, ready for a single `oneshot`.
    #[must_use]
    pub fn pipeline(&self) -> DispatchPipeline {
        self.pipeline.lock().clone()
    }
}

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub dispatch: DispatchState,
    /// `/updates` subscribers.
    pub connections: Arc<ConnectionRegistry>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
