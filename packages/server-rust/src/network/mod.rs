//! HTTP endpoint, update subscribers, configuration and shutdown control.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use connection::*;
pub use handlers::{AppState, DispatchState};
pub use module::{build_router, NetworkModule};
pub use shutdown::*;
