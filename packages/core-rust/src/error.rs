//! Error kinds shared by server and client.
//!
//! The server converts its typed errors into an [`OperationFailure`] before
//! encoding a reply; the client turns it back into a typed error. `ErrorKind`
//! is the stable contract between the two.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a failed operation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Registration-time name collision.
    DuplicateOperation,
    /// No operation registered under the requested name.
    UnknownOperation,
    /// Business-rule violation raised by the handler.
    DomainError,
    /// The gate was torn down while the request waited for it.
    ServerShuttingDown,
    /// The gate was held and the server is configured to reject instead of queueing.
    Busy,
    /// The request exceeded its deadline.
    Timeout,
    /// The server shed the request because too many were in flight.
    Overloaded,
    /// The request body could not be decoded.
    InvalidRequest,
    /// Unexpected server-side failure outside any handler.
    Internal,
}

impl ErrorKind {
    /// Wire label, identical to the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateOperation => "DUPLICATE_OPERATION",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::DomainError => "DOMAIN_ERROR",
            Self::ServerShuttingDown => "SERVER_SHUTTING_DOWN",
            Self::Busy => "BUSY",
            Self::Timeout => "TIMEOUT",
            Self::Overloaded => "OVERLOADED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure half of an execution result as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct OperationFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationFailure {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_as_screaming_snake_case() {
        let bytes = rmp_serde::to_vec_named(&ErrorKind::UnknownOperation).expect("serialize");
        let decoded: String = rmp_serde::from_slice(&bytes).expect("deserialize as string");
        assert_eq!(decoded, "UNKNOWN_OPERATION");
        assert_eq!(decoded, ErrorKind::UnknownOperation.as_str());
    }

    #[test]
    fn failure_display_includes_kind_and_message() {
        let failure = OperationFailure::new(ErrorKind::DomainError, "Motors must be on");
        assert_eq!(failure.to_string(), "DOMAIN_ERROR: Motors must be on");
    }
}
