//! `armgate` Core - wire messages, operation arguments, and error kinds shared
//! by the server and client.

pub mod error;
pub mod messages;
pub mod types;

pub use error::{ErrorKind, OperationFailure};
pub use messages::{
    decode, encode, CodecError, ExecutionResult, OperationInfo, OperationReply, OperationRequest,
    OperationStage, Update,
};
pub use types::{Arguments, Classification, RequestId, Value};
