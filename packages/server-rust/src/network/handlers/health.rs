//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose server health for orchestrators and for operators
//! checking whether the foreground gate is stuck.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;
use crate::service::GateStatus;

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether the server is actually healthy. `gate` is `"idle"` or an object
/// naming the foreground holder.
pub async fn health_handler(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let gate = match state.dispatch.gate.status() {
        GateStatus::Idle => json!("idle"),
        GateStatus::Held(owner) => json!({
            "operation": &*owner.operation,
            "request_id": owner.request_id.0,
            "client_id": owner.client_id,
        }),
    };

    Json(json!({
        "node": &*state.dispatch.node_name,
        "state": health.as_str(),
        "gate": gate,
        "waiting": state.dispatch.gate.waiting(),
        "in_flight": state.shutdown.in_flight_count(),
        "subscribers": state.connections.count(),
        "operations": state.dispatch.registry.len(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe -- always returns 200 OK while the process serves HTTP.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- 200 only while operations are accepted, 503 while
/// starting, draining or stopped.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use armgate_core::RequestId;

    use super::*;
    use crate::network::handlers::test_support::app_state;
    use crate::network::ConnectionConfig;
    use crate::service::GateOwner;

    #[tokio::test]
    async fn health_handler_returns_json_with_all_fields() {
        let state = app_state();
        state.shutdown.set_ready();

        let json = health_handler(State(state)).await.0;

        assert_eq!(json["node"], "test-node");
        assert_eq!(json["state"], "ready");
        assert_eq!(json["gate"], "idle");
        assert_eq!(json["waiting"], 0);
        assert_eq!(json["in_flight"], 0);
        assert_eq!(json["subscribers"], 0);
        assert_eq!(json["operations"], 2);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_handler_names_gate_holder() {
        let state = app_state();
        let _held = state
            .dispatch
            .gate
            .try_acquire(GateOwner {
                request_id: RequestId(12),
                client_id: Some("client-a".into()),
                operation: Arc::from("mount_sample"),
            })
            .unwrap();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["gate"]["operation"], "mount_sample");
        assert_eq!(json["gate"]["request_id"], 12);
        assert_eq!(json["gate"]["client_id"], "client-a");
    }

    #[tokio::test]
    async fn health_handler_reports_draining_state() {
        let state = app_state();
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["state"], "draining");
    }

    #[tokio::test]
    async fn health_handler_reports_subscribers_and_in_flight() {
        let state = app_state();
        let (_handle, _rx) = state.connections.register(&ConnectionConfig::default());
        let _guard = state.shutdown.in_flight_guard();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["subscribers"], 1);
        assert_eq!(json["in_flight"], 1);
    }

    #[tokio::test]
    async fn liveness_handler_always_returns_200() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = app_state();
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
