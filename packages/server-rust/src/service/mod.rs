//! Operation registry, exclusion gate and dispatch pipeline.
//!
//! Request flow:
//!
//! 1. **Intake** (`intake`): `OperationRequest` -> `ExecutionRequest` (request id, timeout)
//! 2. **Middleware** (`middleware`): Tower layers (load-shedding, timeout, metrics)
//! 3. **Dispatch** (`dispatcher`): registry lookup, gate policy, handler invocation
//! 4. **Gate** (`gate`): FIFO exclusion for foreground operations
//! 5. **Updates** (`updates`, `worker`): lifecycle frames and polled controller values

pub mod config;
pub mod dispatcher;
pub mod gate;
pub mod intake;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod updates;
pub mod worker;

// Re-export key types for convenient access.
pub use config::{BusyPolicy, ServerConfig};
pub use dispatcher::{into_execution_result, Dispatcher};
pub use gate::{ExclusionGate, GateError, GateGuard, GateOwner, GateStatus};
pub use intake::RequestIntake;
pub use middleware::{build_dispatch_pipeline, DispatchPipeline};
pub use operation::{
    DomainError, ExecutionRequest, HandlerContext, HandlerResult, Operation, OperationError,
    OperationHandler,
};
pub use registry::{OperationRegistry, RegistryError};
pub use updates::UpdatePublisher;
pub use worker::{BackgroundRunnable, BackgroundWorker, ValuesPoller, ValuesTask, WorkerHandle};
