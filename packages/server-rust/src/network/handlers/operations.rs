//! `POST /operations`: the MsgPack request/reply endpoint.

use armgate_core::{
    decode, encode, ErrorKind, ExecutionResult, OperationFailure, OperationReply,
    OperationRequest,
};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tower::ServiceExt;
use tracing::{debug, error};

use super::AppState;
use crate::service::into_execution_result;

const MSGPACK: &str = "application/msgpack";

/// Decodes an `OperationRequest`, runs it through the dispatch pipeline and
/// replies with an `OperationReply`.
///
/// Every outcome, including dispatch failures, is a MsgPack reply; only an
/// undecodable body gets a non-200 status. The dispatch runs on its own task,
/// so a client that disconnects mid-operation does not cancel the handler.
pub async fn operations_handler(State(state): State<AppState>, body: Bytes) -> Response {
    match decode::<OperationRequest>(&body) {
        Ok(request) => {
            let reply = run_operation(&state, request).await;
            msgpack_reply(StatusCode::OK, &reply)
        }
        Err(e) => {
            debug!(error = %e, "rejecting undecodable operation request");
            let reply = OperationReply {
                request_id: None,
                result: Err(OperationFailure::new(ErrorKind::InvalidRequest, e.to_string())),
            };
            msgpack_reply(StatusCode::BAD_REQUEST, &reply)
        }
    }
}

async fn run_operation(state: &AppState, request: OperationRequest) -> OperationReply {
    if !state.shutdown.health_state().is_accepting() {
        return OperationReply {
            request_id: None,
            result: Err(OperationFailure::new(
                ErrorKind::ServerShuttingDown,
                "server shutting down",
            )),
        };
    }

    let in_flight = state.shutdown.in_flight_guard();
    let request = state.dispatch.intake.admit(request);
    let request_id = request.request_id;
    let pipeline = state.dispatch.pipeline();

    let task = tokio::spawn(async move {
        let _in_flight = in_flight;
        pipeline.oneshot(request).await
    });

    let result: ExecutionResult = match task.await {
        Ok(result) => into_execution_result(result),
        Err(join_error) => {
            error!(request_id = %request_id, error = %join_error, "dispatch task failed");
            Err(OperationFailure::new(
                ErrorKind::Internal,
                format!("dispatch task failed: {join_error}"),
            ))
        }
    };

    OperationReply {
        request_id: Some(request_id),
        result,
    }
}

fn msgpack_reply(status: StatusCode, reply: &OperationReply) -> Response {
    match encode(reply) {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, MSGPACK)], bytes).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode operation reply");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use armgate_core::{Arguments, RequestId, Value};
    use axum::body::to_bytes;

    use super::*;
    use crate::network::handlers::test_support::app_state;

    async fn call(state: AppState, body: Vec<u8>) -> (StatusCode, OperationReply) {
        let response = operations_handler(State(state), Bytes::from(body)).await;
        let status = response.status();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            MSGPACK
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, decode(&bytes).unwrap())
    }

    fn request(name: &str, args: Arguments) -> Vec<u8> {
        encode(&OperationRequest::new(name, args)).unwrap()
    }

    #[tokio::test]
    async fn successful_operation_returns_value() {
        let state = app_state();
        state.shutdown.set_ready();

        let (status, reply) = call(state, request("echo", Arguments::new().arg("hi"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.request_id, Some(RequestId(1)));
        assert_eq!(reply.result, Ok(Value::from("hi")));
    }

    #[tokio::test]
    async fn domain_error_is_carried_verbatim() {
        let state = app_state();
        state.shutdown.set_ready();

        let (status, reply) = call(state.clone(), request("refuse", Arguments::new())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            reply.result,
            Err(OperationFailure::new(ErrorKind::DomainError, "Motors must be on"))
        );
        assert!(state.dispatch.gate.is_idle());
        assert_eq!(state.shutdown.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn unknown_operation_is_reported() {
        let state = app_state();
        state.shutdown.set_ready();

        let (_, reply) = call(state, request("does_not_exist", Arguments::new())).await;
        let failure = reply.result.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::UnknownOperation);
        assert!(failure.message.contains("does_not_exist"));
    }

    #[tokio::test]
    async fn garbage_body_is_invalid_request() {
        let state = app_state();
        state.shutdown.set_ready();

        let (status, reply) = call(state, vec![0xc1, 0x00, 0xff]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.request_id, None);
        assert_eq!(reply.result.unwrap_err().kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn draining_server_refuses_operations() {
        let state = app_state();
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();

        let (_, reply) = call(state, request("echo", Arguments::new())).await;
        assert_eq!(reply.result.unwrap_err().kind, ErrorKind::ServerShuttingDown);
    }
}
