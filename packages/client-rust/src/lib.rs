//! `armgate` Client - runs operations on an armgate server and follows its
//! update stream.

pub mod client;
pub mod config;
pub mod error;
pub mod updates;

pub use client::OperationClient;
pub use config::ClientConfig;
pub use error::{ClientError, TransportError};
pub use updates::{OperationEvent, Subscription, UpdateDelegate};
