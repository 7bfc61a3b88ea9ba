//! Wire messages exchanged between `armgate` clients and the server.
//!
//! All messages are encoded as named `MsgPack` maps via
//! `rmp_serde::to_vec_named()` with camelCase field names. Requests and replies
//! travel over `POST /operations`; [`Update`] frames are pushed over the
//! `/updates` WebSocket.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::OperationFailure;
use crate::types::{Arguments, Classification, RequestId, Value};

/// Outcome of one operation call: the handler's value or a typed failure.
pub type ExecutionResult = Result<Value, OperationFailure>;

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

/// A client's request to run a named operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub operation: String,
    #[serde(default)]
    pub arguments: Arguments,
    /// Identifies the calling client in logs and gate ownership.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client_id: Option<String>,
    /// Overrides the server's default operation timeout.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout_ms: Option<u64>,
}

impl OperationRequest {
    #[must_use]
    pub fn new(operation: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            operation: operation.into(),
            arguments,
            client_id: None,
            timeout_ms: None,
        }
    }
}

/// The server's answer to a single [`OperationRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReply {
    /// `None` when the request was rejected before an id was assigned
    /// (undecodable body, server draining).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<RequestId>,
    pub result: ExecutionResult,
}

// ---------------------------------------------------------------------------
// Update stream
// ---------------------------------------------------------------------------

/// Lifecycle stage of an operation as reported on the update stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStage {
    Start,
    Update,
    End,
}

/// Server-push frame on the `/updates` WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Update {
    /// Progress of a dispatched operation.
    #[serde(rename = "OPERATION")]
    Operation {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        operation: String,
        stage: OperationStage,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        error: Option<String>,
    },

    /// Controller channels whose values changed since the last frame.
    #[serde(rename = "VALUES")]
    Values { data: BTreeMap<String, Value> },
}

/// Registered operation as listed by the built-in `operations` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub name: String,
    pub classification: Classification,
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Failure to encode or decode a wire message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes a message as a named `MsgPack` map.
///
/// # Errors
///
/// Returns `CodecError::Encode` if the value cannot be serialized.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decodes a message produced by [`encode`].
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes are not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn request_omits_absent_optionals() {
        let req = OperationRequest::new("refresh", Arguments::new());
        let bytes = encode(&req).expect("encode");
        let raw: rmpv::Value = decode(&bytes).expect("decode as value");
        let keys: Vec<&str> = raw
            .as_map()
            .expect("map")
            .iter()
            .filter_map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(keys, vec!["operation", "arguments"]);
    }

    #[test]
    fn request_decodes_without_arguments_field() {
        #[derive(Serialize)]
        struct Bare<'a> {
            operation: &'a str,
        }
        let bytes = encode(&Bare { operation: "ping" }).expect("encode");
        let req: OperationRequest = decode(&bytes).expect("decode");
        assert_eq!(req.operation, "ping");
        assert!(req.arguments.is_empty());
        assert!(req.client_id.is_none());
    }

    #[test]
    fn reply_carries_failure_kind_and_message() {
        let reply = OperationReply {
            request_id: Some(RequestId(3)),
            result: Err(OperationFailure::new(
                ErrorKind::DomainError,
                "Motors must be on",
            )),
        };
        let decoded: OperationReply = decode(&encode(&reply).expect("encode")).expect("decode");
        let failure = decoded.result.expect_err("failure");
        assert_eq!(failure.kind, ErrorKind::DomainError);
        assert_eq!(failure.message, "Motors must be on");
        assert_eq!(decoded.request_id, Some(RequestId(3)));
    }

    #[test]
    fn update_uses_type_discriminator() {
        let update = Update::Operation {
            request_id: RequestId(1),
            operation: "calibrate".into(),
            stage: OperationStage::Start,
            message: None,
            error: None,
        };
        let bytes = encode(&update).expect("encode");
        let raw: rmpv::Value = decode(&bytes).expect("decode as value");
        let type_field = raw
            .as_map()
            .expect("map")
            .iter()
            .find(|(k, _)| k.as_str() == Some("type"))
            .map(|(_, v)| v.as_str().map(str::to_owned));
        assert_eq!(type_field, Some(Some("OPERATION".to_string())));

        let decoded: Update = decode(&bytes).expect("decode");
        assert_eq!(decoded, update);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode::<OperationRequest>(&[0xc1]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
