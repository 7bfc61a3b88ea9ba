//! Server lifecycle: wires registry, gate, dispatcher, poller and HTTP endpoint.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use armgate_core::{Arguments, Classification, Value};
use parking_lot::Mutex;
use tracing::info;

use crate::controller::Controller;
use crate::network::{DispatchState, NetworkConfig, NetworkModule, ShutdownController};
use crate::service::{
    build_dispatch_pipeline, BackgroundWorker, Dispatcher, DomainError, ExclusionGate,
    HandlerContext, HandlerResult, OperationHandler, OperationRegistry, RegistryError,
    RequestIntake, ServerConfig, UpdatePublisher, ValuesPoller,
};

/// Owns every server-side component for the life of the process.
///
/// Lifecycle: [`new`](Self::new) → [`register`](Self::register)* →
/// [`start`](Self::start) → [`serve`](Self::serve). Registration closes at
/// `start`.
pub struct ServerContext {
    config: ServerConfig,
    network: NetworkModule,
    registry: Arc<OperationRegistry>,
    gate: ExclusionGate,
    controller: Arc<dyn Controller>,
    updates: UpdatePublisher,
    poller: Option<BackgroundWorker<ValuesPoller>>,
}

impl ServerContext {
    /// Builds the context and registers the built-in `refresh` and
    /// `operations` background operations.
    ///
    /// # Errors
    ///
    /// Only if a built-in cannot be registered, which would be a bug.
    pub fn new(
        config: ServerConfig,
        network: NetworkConfig,
        controller: Arc<dyn Controller>,
    ) -> Result<Self, RegistryError> {
        let network = NetworkModule::new(network);
        let updates = UpdatePublisher::new(network.connections());
        let registry = Arc::new(OperationRegistry::new());

        registry.register("refresh", Classification::Background, refresh)?;
        let listing = Arc::downgrade(&registry);
        registry.register(
            "operations",
            Classification::Background,
            move |_ctx: HandlerContext, _args: Arguments| {
                let listing = Weak::clone(&listing);
                async move { list_operations(&listing) }
            },
        )?;

        let gate = ExclusionGate::with_queue_limit(config.max_queued_foreground);
        Ok(Self {
            config,
            network,
            registry,
            gate,
            controller,
            updates,
            poller: None,
        })
    }

    /// Registers an application operation.
    ///
    /// # Errors
    ///
    /// `RegistryError::Duplicate` for a taken name, `RegistryError::Closed` after `start`.
    pub fn register<H: OperationHandler>(
        &self,
        name: &str,
        classification: Classification,
        handler: H,
    ) -> Result<(), RegistryError> {
        self.registry.register(name, classification, handler)
    }

    /// A dispatcher sharing this server's registry, gate and controller,
    /// bypassing the HTTP endpoint and middleware.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.registry),
            self.gate.clone(),
            Arc::clone(&self.controller),
            self.updates.clone(),
            self.config.busy_policy,
        )
    }

    #[must_use]
    pub fn gate(&self) -> &ExclusionGate {
        &self.gate
    }

    #[must_use]
    pub fn registry(&self) -> Arc<OperationRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        self.network.shutdown_controller()
    }

    /// Binds the listener, closes registration and starts the values poller.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        let addr = self.network.start().await?;
        self.registry.seal();

        let poller = ValuesPoller::new(Arc::clone(&self.controller), self.updates.clone());
        self.poller = Some(BackgroundWorker::start(
            poller,
            self.config.values_poll_interval(),
        ));

        info!(
            node = %self.config.node_name,
            address = %addr,
            operations = self.registry.len(),
            busy_policy = ?self.config.busy_policy,
            "server started"
        );
        Ok(addr)
    }

    /// Serves until `shutdown` resolves, then closes the gate, drains
    /// subscribers and in-flight operations, and stops the poller.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or serving fails.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let dispatch = DispatchState {
            pipeline: Arc::new(Mutex::new(build_dispatch_pipeline(
                self.dispatcher(),
                &self.config,
            ))),
            intake: Arc::new(
                RequestIntake::new(&self.config)
                    .within_exchange(self.network.config().request_timeout),
            ),
            gate: self.gate.clone(),
            registry: Arc::clone(&self.registry),
            values: self.poller.as_ref().and_then(BackgroundWorker::handle),
            node_name: Arc::from(self.config.node_name.as_str()),
        };

        let served = self.network.serve(dispatch, shutdown).await;

        if let Some(mut poller) = self.poller.take() {
            poller.stop().await;
        }
        info!(node = %self.config.node_name, "server stopped");
        served
    }
}

async fn refresh(ctx: HandlerContext, _args: Arguments) -> HandlerResult {
    Ok(ctx.controller().snapshot().to_value())
}

fn list_operations(registry: &Weak<OperationRegistry>) -> HandlerResult {
    let registry = registry
        .upgrade()
        .ok_or_else(|| DomainError::new("server shutting down"))?;
    rmpv::ext::to_value(registry.names())
        .map_err(|e| DomainError::new(format!("failed to encode operation list: {e}")))
}
