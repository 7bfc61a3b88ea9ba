//! Network module with deferred startup lifecycle.
//!
//! `new()` creates the shared resources, `start()` binds the TCP listener and
//! `serve()` accepts connections. Between `start()` and `serve()` the server
//! context seals the registry and starts the values poller.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::connection::{ConnectionRegistry, OutboundMessage};
use super::handlers::{
    health_handler, liveness_handler, operations_handler, readiness_handler, updates_handler,
    AppState, DispatchState,
};
use super::middleware::apply_http_layers;
use super::shutdown::ShutdownController;

/// Assembles the axum router with all routes and middleware.
///
/// Routes:
/// - `GET /health` -- detailed health JSON
/// - `GET /health/live` -- liveness probe
/// - `GET /health/ready` -- readiness probe
/// - `POST /operations` -- MsgPack operation endpoint
/// - `GET /updates` -- WebSocket update stream
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let routes = Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/operations", post(operations_handler))
        .route("/updates", get(updates_handler))
        .with_state(state);
    apply_http_layers(routes, &config)
}

/// Manages the HTTP/WebSocket server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    connections: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    ///
    /// The connection registry and shutdown controller are allocated
    /// immediately so the update publisher can share them before start.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            connections: Arc::new(ConnectionRegistry::new()),
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    #[must_use]
    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.connections)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the bound address; the port differs from the configured one
    /// when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local = listener.local_addr()?;

        info!(address = %local, "TCP listener bound");

        self.listener = Some(listener);
        Ok(local)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// On the shutdown signal:
    /// 1. Health state moves to Draining and the gate closes, failing queued foreground requests
    /// 2. In-flight HTTP exchanges finish
    /// 3. Every update subscriber receives a Close frame
    /// 4. In-flight operations get up to `drain_timeout` to complete
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a fatal I/O error.
    pub async fn serve(
        self,
        dispatch: DispatchState,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let connections = self.connections;
        let shutdown_ctrl = self.shutdown;
        let drain_timeout = self.config.drain_timeout;

        let gate = dispatch.gate.clone();
        let router = build_router(AppState {
            dispatch,
            connections: Arc::clone(&connections),
            shutdown: Arc::clone(&shutdown_ctrl),
            config: Arc::new(self.config),
            start_time: Instant::now(),
        });

        shutdown_ctrl.set_ready();
        info!("serving operations");

        let signal_ctrl = Arc::clone(&shutdown_ctrl);
        let on_signal = async move {
            shutdown.await;
            info!("shutdown signal received");
            signal_ctrl.trigger_shutdown();
            let failed = gate.close();
            if failed > 0 {
                info!(failed, "failed queued foreground requests");
            }
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(on_signal)
            .await?;

        drain_connections(&connections, &shutdown_ctrl, drain_timeout).await;
        Ok(())
    }
}

/// Closes every subscriber and waits for in-flight operations.
async fn drain_connections(
    connections: &ConnectionRegistry,
    shutdown_ctrl: &ShutdownController,
    drain_timeout: Duration,
) {
    shutdown_ctrl.trigger_shutdown();

    let handles = connections.drain_all();
    if !handles.is_empty() {
        info!(subscribers = handles.len(), "closing update subscribers");
        for handle in &handles {
            let _ = handle.try_send(OutboundMessage::Close(Some(
                "server shutting down".to_string(),
            )));
        }
    }

    if shutdown_ctrl.wait_for_drain(drain_timeout).await {
        info!("all operations drained");
    } else {
        warn!(
            in_flight = shutdown_ctrl.in_flight_count(),
            "drain timeout expired with operations still running"
        );
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::network::handlers::test_support::app_state;
    use crate::network::HealthState;

    #[test]
    fn new_creates_module_without_binding() {
        let module = NetworkModule::new(NetworkConfig::default());
        assert!(module.listener.is_none());
        assert!(Arc::ptr_eq(&module.connections(), &module.connections()));
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = NetworkModule::new(NetworkConfig::default());
        let addr = module.start().await.unwrap();
        assert!(addr.port() > 0);
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = NetworkModule::new(NetworkConfig::default());
        let dispatch = app_state().dispatch;
        let err = module
            .serve(dispatch, std::future::ready(()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn router_serves_health_with_request_id() {
        let state = app_state();
        state.shutdown.set_ready();
        let router = build_router(state);

        let response = router
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn serve_drains_and_closes_gate_on_signal() {
        let mut module = NetworkModule::new(NetworkConfig::default());
        module.start().await.unwrap();
        let shutdown_ctrl = module.shutdown_controller();
        let dispatch = app_state().dispatch;
        let gate = dispatch.gate.clone();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(module.serve(dispatch, async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();

        assert!(gate.is_closed());
        assert_eq!(shutdown_ctrl.health_state(), HealthState::Stopped);
    }
}
