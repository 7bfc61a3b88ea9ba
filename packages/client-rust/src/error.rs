//! Client error types.

use armgate_core::{CodecError, ErrorKind, OperationFailure};

/// Failure of one client call.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server ran the request and reported a failure.
    #[error("{kind}: {message}")]
    Operation { kind: ErrorKind, message: String },

    /// The request never produced a server reply.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame or reply body could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A non-success status whose body was not an operation reply.
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    /// The reply value did not have the shape the call expects.
    #[error("unexpected reply value: {0}")]
    UnexpectedValue(String),
}

impl ClientError {
    /// The server-side error kind, if the server answered with a failure.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Operation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The server-side message, if the server answered with a failure.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Operation { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl From<OperationFailure> for ClientError {
    fn from(failure: OperationFailure) -> Self {
        Self::Operation {
            kind: failure.kind,
            message: failure.message,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(TransportError::Http(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(TransportError::WebSocket(err))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[source] reqwest::Error),
    #[error("websocket: {0}")]
    WebSocket(#[source] tokio_tungstenite::tungstenite::Error),
}
