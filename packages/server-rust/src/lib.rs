//! `armgate` Server - operation registry, foreground exclusion gate, dispatcher
//! and the axum endpoint that exposes them.

pub mod controller;
pub mod network;
pub mod server;
pub mod service;

pub use controller::{
    parse_task_result, run_foreground_task, Controller, ControllerError, ControllerSnapshot,
    ForegroundTiming, SimulatedController,
};
pub use network::{NetworkConfig, ShutdownController};
pub use server::ServerContext;
pub use service::{
    BusyPolicy, DomainError, ExclusionGate, HandlerContext, HandlerResult, OperationError,
    OperationHandler, RegistryError, ServerConfig,
};
