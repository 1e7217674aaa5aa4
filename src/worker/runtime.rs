//! One worker's run: startup, serve, teardown.
//!
//! # Data Flow
//! ```text
//! startup:  adopt sockets → accept loop + HTTP → broker subscription
//!           → registry register / x_subscribe (unless ronin)
//!           → `service_ready` hooks (a hard failure aborts startup)
//! serve:    until shutdown triggers
//! teardown: stop accepting → drain → close sockets → stop HTTP and
//!           subscription loops → close pooled client connections
//! ```

use std::sync::Arc;

use axum_server::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{HostError, WorkerError};
use crate::host::HostContext;
use crate::http::{HttpRoutes, HttpServer};
use crate::lifecycle::{DrainReport, DrainSupervisor, ServiceReady, Shutdown};
use crate::net::{ConnectionContext, Listener, PacketHandler};
use crate::pubsub::{BusSubscription, SubscriptionSet};
use crate::registry::Registration;
use crate::rpc::{serve_tcp, ServiceDispatcher, TcpService};
use crate::worker::orchestrator::WORKER_ENV;
use crate::worker::sockets::{SharedSockets, LISTEN_FDS_ENV};

/// What a worker process learns from its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEnv {
    pub ordinal: usize,
    pub listen_fds: String,
}

impl WorkerEnv {
    /// `None` when this process was not started by an orchestrator.
    pub fn from_env() -> Result<Option<Self>, WorkerError> {
        Self::from_vars(std::env::var(WORKER_ENV).ok(), std::env::var(LISTEN_FDS_ENV).ok())
    }

    pub fn from_vars(worker: Option<String>, listen_fds: Option<String>) -> Result<Option<Self>, WorkerError> {
        let Some(worker) = worker else {
            return Ok(None);
        };
        let ordinal = worker
            .trim()
            .parse()
            .map_err(|_| WorkerError::InvalidEnvironment(format!("{WORKER_ENV}={worker}")))?;
        let listen_fds = listen_fds.ok_or(WorkerError::MissingSocket("tcp"))?;
        Ok(Some(Self { ordinal, listen_fds }))
    }
}

/// Everything one worker serves.
pub struct WorkerRuntime {
    ordinal: usize,
    context: Arc<HostContext>,
    services: Vec<TcpService>,
    routes: HttpRoutes,
    subscriptions: SubscriptionSet,
}

/// Tasks started by a worker that teardown has to stop.
struct Running {
    stop_accepting: CancellationToken,
    accept: JoinHandle<Listener>,
    http: Option<(Handle, JoinHandle<std::io::Result<()>>)>,
    subscription: Option<BusSubscription>,
}

impl WorkerRuntime {
    pub fn new(
        ordinal: usize,
        context: Arc<HostContext>,
        services: Vec<TcpService>,
        routes: HttpRoutes,
        subscriptions: SubscriptionSet,
    ) -> Self {
        Self {
            ordinal,
            context,
            services,
            routes,
            subscriptions,
        }
    }

    /// Serve until `shutdown` triggers, then drain.
    pub async fn run(self, sockets: SharedSockets, shutdown: Shutdown) -> Result<DrainReport, HostError> {
        let Self {
            ordinal,
            context,
            services,
            routes,
            subscriptions,
        } = self;
        let config = context.config();
        let drain = DrainSupervisor::new(context.connections().clone(), &config.drain);

        let (tcp, http) = sockets.into_parts();
        let listener = Listener::from_std(tcp, config.tcp.max_connections)?;
        let port = listener.local_addr()?.port();

        let dispatcher = ServiceDispatcher::new(services, subscriptions.clone());
        let ctx = ConnectionContext {
            connections: context.connections().clone(),
            table: Arc::clone(context.table()),
            handler: Arc::new(dispatcher.clone()) as Arc<dyn PacketHandler>,
        };
        let stop_accepting = CancellationToken::new();
        let accept = tokio::spawn(serve_tcp(listener, ctx, stop_accepting.clone()));

        let http = http.map(|socket| {
            let server = HttpServer::new(routes, &config.http, config.timeouts.request());
            let handle = Handle::new();
            let task = tokio::spawn(server.serve(socket, handle.clone()));
            (handle, task)
        });

        let mut running = Running {
            stop_accepting,
            accept,
            http,
            subscription: None,
        };

        let started = announce(ordinal, &context, &dispatcher, &subscriptions, port, &mut running).await;
        if let Err(e) = started {
            tracing::error!(worker = ordinal, error = %e, "Worker startup failed");
            running.stop(&drain).await;
            return Err(e);
        }

        tracing::info!(worker = ordinal, port, node_id = %context.node_id(), "Worker ready");
        shutdown.triggered().await;
        tracing::info!(worker = ordinal, "Worker shutting down");

        let report = running.stop(&drain).await;
        context.rpc().close_all();
        Ok(report)
    }
}

/// Subscribe, register with the registry and fire `service_ready`.
async fn announce(
    ordinal: usize,
    context: &HostContext,
    dispatcher: &ServiceDispatcher,
    subscriptions: &SubscriptionSet,
    port: u16,
    running: &mut Running,
) -> Result<(), HostError> {
    let config = context.config();

    if let Err(e) = context.bus().connect().await {
        tracing::warn!(error = %e, "Broker unavailable at startup, publishing will retry");
    }
    if !subscriptions.is_empty() {
        let channels = subscriptions.channel_keys().iter().map(ToString::to_string).collect();
        let subs = subscriptions.clone();
        let subscription = context
            .bus()
            .subscribe(channels, move |channel, payload| {
                let subs = subs.clone();
                async move { subs.dispatch(channel, payload).await }
            })
            .await?;
        running.subscription = Some(subscription);
    }

    if config.registry.ronin {
        tracing::info!("Ronin mode, skipping registration");
    } else {
        let host = &config.service.host_name;
        for service in dispatcher.services() {
            context
                .registry()
                .register(&Registration {
                    service: service.name().to_string(),
                    version: service.version().to_string(),
                    node_id: context.node_id().to_string(),
                    host: host.clone(),
                    port,
                    endpoints: service.endpoint_names(),
                })
                .await?;
            tracing::info!(service = %service.name(), version = %service.version(), "Registered service");
        }
        if !subscriptions.is_empty() {
            context
                .registry()
                .x_subscribe(host, port, context.node_id(), &subscriptions.specs())
                .await?;
        }
    }

    context
        .signals()
        .service_ready
        .run(ServiceReady {
            service: config.service.name.to_lowercase(),
            version: config.service.version.clone(),
            node_id: context.node_id().to_string(),
            worker: ordinal,
        })
        .await?;
    Ok(())
}

impl Running {
    async fn stop(self, drain: &DrainSupervisor) -> DrainReport {
        self.stop_accepting.cancel();
        if let Some((handle, _)) = &self.http {
            handle.graceful_shutdown(Some(drain.grace_period()));
        }
        let listener = self.accept.await;

        let report = drain.drain().await;
        drop(listener);

        if let Some((_, task)) = self.http {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "HTTP server ended with an error"),
                Err(e) => tracing::warn!(error = %e, "HTTP server task failed"),
            }
        }
        if let Some(subscription) = self.subscription {
            subscription.stop();
        }
        report
    }
}
