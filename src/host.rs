//! Hosting services: the process-wide context and the host builder.
//!
//! # Responsibilities
//! - Build the per-process context (node id, correlation table, registry,
//!   bus, publisher, outbound clients, lifecycle signals) once and inject it
//! - Collect TCP services, HTTP routes and subscribers explicitly
//! - Decide whether this process is the orchestrator or one of its workers
//!
//! # Data Flow
//! ```text
//! Host::run
//!     ├─ MICROHOST_WORKER unset → bind sockets, spawn workers, supervise
//!     └─ MICROHOST_WORKER=n     → adopt sockets, WorkerRuntime::run
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::Instrument;

use crate::config::HostConfig;
use crate::error::{HostError, WorkerError};
use crate::http::HttpRoutes;
use crate::lifecycle::{forward_to_shutdown, DrainReport, Shutdown, Signals};
use crate::net::{ConnectionRegistry, ResponsesOnly};
use crate::observability::{init_logging, metrics, worker_identifier};
use crate::pubsub::{Broker, FanoutPublisher, MemoryBroker, PubSubBus, Publisher, RedisBroker, Subscriber, SubscriptionSet};
use crate::registry::{Registry, StaticRegistry, TcpRegistryClient};
use crate::rpc::{CorrelationTable, RpcClient, ServiceClient, TcpService};
use crate::worker::{ExitKind, Orchestrator, SharedSockets, WorkerCommand, WorkerEnv, WorkerRuntime};

/// Process-wide state shared by everything a host runs.
pub struct HostContext {
    config: HostConfig,
    node_id: String,
    connections: ConnectionRegistry,
    table: Arc<CorrelationTable>,
    registry: Arc<dyn Registry>,
    bus: Arc<PubSubBus>,
    publisher: Publisher,
    rpc: Arc<RpcClient>,
    fanout: FanoutPublisher,
    signals: Signals,
}

impl HostContext {
    /// Registry and broker chosen from configuration: a static registry in
    /// ronin mode, and an in-process broker unless one is enabled.
    pub fn new(config: HostConfig) -> Self {
        let connections = ConnectionRegistry::new();
        let registry: Arc<dyn Registry> = if config.registry.ronin {
            Arc::new(StaticRegistry::new())
        } else {
            Arc::new(TcpRegistryClient::new(
                config.registry.address(),
                connections.clone(),
                config.timeouts.clone(),
            ))
        };
        let broker: Arc<dyn Broker> = if config.broker.enabled {
            Arc::new(RedisBroker::new(&config.broker, config.timeouts.connect()))
        } else {
            Arc::new(MemoryBroker::new())
        };
        Self::assemble(config, connections, registry, broker)
    }

    pub fn with_parts(config: HostConfig, registry: Arc<dyn Registry>, broker: Arc<dyn Broker>) -> Self {
        Self::assemble(config, ConnectionRegistry::new(), registry, broker)
    }

    fn assemble(
        config: HostConfig,
        connections: ConnectionRegistry,
        registry: Arc<dyn Registry>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let node_id = uuid::Uuid::new_v4().simple().to_string();
        let table = Arc::new(CorrelationTable::new());
        let bus = Arc::new(PubSubBus::new(broker));
        let publisher = Publisher::new(Arc::clone(&bus), &config.service.name, &config.service.version);
        let rpc = Arc::new(RpcClient::new(
            Arc::clone(&registry),
            Arc::clone(&table),
            connections.clone(),
            Arc::new(ResponsesOnly),
            config.timeouts.clone(),
        ));
        let fanout = FanoutPublisher::new(
            &config.service.name,
            &config.service.version,
            Arc::clone(&registry),
            connections.clone(),
            config.timeouts.connect(),
        );

        Self {
            config,
            node_id,
            connections,
            table,
            registry,
            bus,
            publisher,
            rpc,
            fanout,
            signals: Signals::new(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<PubSubBus> {
        &self.bus
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    pub fn fanout(&self) -> &FanoutPublisher {
        &self.fanout
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Client for `service`/`version` sharing this process's connections.
    pub fn client(&self, service: &str, version: impl ToString) -> ServiceClient {
        ServiceClient::new(Arc::clone(&self.rpc), service, version)
    }
}

/// Builder for the services, routes and subscribers one binary hosts.
pub struct Host {
    context: Arc<HostContext>,
    services: Vec<TcpService>,
    routes: HttpRoutes,
    subscribers: Vec<Subscriber>,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        Self::with_context(Arc::new(HostContext::new(config)))
    }

    pub fn with_context(context: Arc<HostContext>) -> Self {
        Self {
            context,
            services: Vec::new(),
            routes: HttpRoutes::new(),
            subscribers: Vec::new(),
        }
    }

    /// The context handlers can capture before the host starts.
    pub fn context(&self) -> Arc<HostContext> {
        Arc::clone(&self.context)
    }

    pub fn tcp_service(mut self, service: TcpService) -> Self {
        self.services.push(service);
        self
    }

    pub fn http_routes(mut self, routes: HttpRoutes) -> Self {
        self.routes = routes;
        self
    }

    pub fn subscriber(mut self, subscriber: Subscriber) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Run as the orchestrator, or as a worker when started by one.
    pub async fn run(self) -> Result<(), HostError> {
        match WorkerEnv::from_env()? {
            Some(env) => self.run_worker(env).await.map(|_| ()),
            None => self.run_orchestrator().await,
        }
    }

    /// Serve on already-bound sockets in this process until `shutdown`.
    pub async fn serve(
        self,
        sockets: SharedSockets,
        ordinal: usize,
        shutdown: Shutdown,
    ) -> Result<DrainReport, HostError> {
        WorkerRuntime::new(
            ordinal,
            self.context,
            self.services,
            self.routes,
            SubscriptionSet::new(self.subscribers),
        )
        .run(sockets, shutdown)
        .await
    }

    async fn run_worker(self, env: WorkerEnv) -> Result<DrainReport, HostError> {
        let identifier = worker_identifier(&self.context.config().service.name, env.ordinal);
        let (span, _) = init_logging(&self.context.config().observability, &identifier);

        let shutdown = Shutdown::new();
        forward_to_shutdown(shutdown.clone()).map_err(WorkerError::Signals)?;
        let sockets = SharedSockets::from_env_value(&env.listen_fds)?;

        let result = self.serve(sockets, env.ordinal, shutdown).instrument(span.clone()).await;
        if let Err(e) = &result {
            span.in_scope(|| tracing::error!(error = %e, kind = e.as_label(), "Worker failed"));
        }
        result
    }

    async fn run_orchestrator(self) -> Result<(), HostError> {
        let config = self.context.config().clone();
        let (span, _) = init_logging(&config.observability, &format!("{}-main", config.service.name));
        orchestrate(config).instrument(span).await
    }
}

async fn orchestrate(config: HostConfig) -> Result<(), HostError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    forward_to_shutdown(shutdown.clone()).map_err(WorkerError::Signals)?;

    let sockets = SharedSockets::bind(&config)?;
    let command = WorkerCommand::current_exe().map_err(|source| WorkerError::Spawn { ordinal: 0, source })?;
    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        workers = config.workers.count,
        ronin = config.registry.ronin,
        "Starting workers"
    );

    let exits = Orchestrator::new(sockets, command, config.workers.count)
        .run(shutdown)
        .await?;
    let crashed = exits.iter().filter(|e| e.kind != ExitKind::Clean).count();
    tracing::info!(workers = exits.len(), crashed, "All workers exited");
    Ok(())
}
