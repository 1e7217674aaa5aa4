//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use microhost::config::HostConfig;
use microhost::error::HostError;
use microhost::lifecycle::{DrainReport, Shutdown};
use microhost::net::{ConnectionContext, ConnectionRegistry, Listener};
use microhost::protocol::{Packet, RemoteError};
use microhost::pubsub::SubscriptionSet;
use microhost::registry::{Registration, Registry, StaticRegistry, SubscriptionSpec};
use microhost::rpc::{serve_tcp, CorrelationTable, ServiceDispatcher, TcpService};
use microhost::worker::SharedSockets;
use microhost::Host;

/// A host config bound to ephemeral loopback ports with a short drain.
pub fn local_config(service: &str) -> HostConfig {
    let mut config = HostConfig::default();
    config.service.name = service.to_string();
    config.tcp.bind_address = "127.0.0.1:0".into();
    config.http.bind_address = "127.0.0.1:0".into();
    config.http.enabled = false;
    config.registry.ronin = true;
    config.timeouts.connect_secs = 1;
    config.timeouts.request_secs = 2;
    config.drain.tick_ms = 50;
    config.drain.ticks = 5;
    config
}

/// Point `config` at a registry listening on `addr`.
pub fn use_registry(config: &mut HostConfig, addr: SocketAddr) {
    config.registry.ronin = false;
    config.registry.host = addr.ip().to_string();
    config.registry.port = addr.port();
}

/// A host running in-process on its own sockets.
pub struct RunningHost {
    pub tcp_addr: SocketAddr,
    pub http_addr: Option<SocketAddr>,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<DrainReport, HostError>>,
}

impl RunningHost {
    /// Trigger shutdown and wait for the drain report.
    pub async fn stop(self) -> DrainReport {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("host did not stop")
            .expect("host task panicked")
            .expect("host failed")
    }
}

/// Start `host` on fresh sockets and wait for its `service_ready` hooks.
pub async fn start_host(host: Host) -> RunningHost {
    let context = host.context();
    let sockets = SharedSockets::bind(context.config()).expect("bind sockets");
    let tcp_addr = sockets.tcp_addr().unwrap();
    let http_addr = sockets.http_addr().map(|addr| addr.unwrap());

    let ready = Arc::new(Notify::new());
    let notify = Arc::clone(&ready);
    context.signals().service_ready.register(
        move |_| {
            let notify = Arc::clone(&notify);
            async move {
                notify.notify_one();
                Ok(())
            }
        },
        true,
    );

    let shutdown = Shutdown::new();
    let task = tokio::spawn(host.serve(sockets, 0, shutdown.clone()));
    tokio::time::timeout(Duration::from_secs(5), ready.notified())
        .await
        .expect("host never became ready");

    RunningHost {
        tcp_addr,
        http_addr,
        shutdown,
        task,
    }
}

/// A registry process stand-in: the four registry endpoints served over
/// the packet protocol, backed by a `StaticRegistry`.
pub struct FakeRegistry {
    pub addr: SocketAddr,
    pub store: Arc<StaticRegistry>,
    stop: CancellationToken,
}

impl Drop for FakeRegistry {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn decode<T: DeserializeOwned>(args: Value) -> Result<T, RemoteError> {
    serde_json::from_value(args).map_err(|e| RemoteError::invalid_request(e.to_string()))
}

fn internal(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::internal(e.to_string())
}

#[derive(Deserialize)]
struct DiscoverArgs {
    service: String,
    version: String,
}

#[derive(Deserialize)]
struct SubscribeArgs {
    host: String,
    port: u16,
    node_id: String,
    subscriptions: Vec<SubscriptionSpec>,
}

#[derive(Deserialize)]
struct SubscribersArgs {
    service: String,
    version: String,
    endpoint: String,
}

fn registry_service(store: Arc<StaticRegistry>) -> TcpService {
    let register = Arc::clone(&store);
    let discover = Arc::clone(&store);
    let subscribe = Arc::clone(&store);
    let subscribers = store;

    TcpService::builder("registry", "1")
        .endpoint("register", move |args| {
            let store = Arc::clone(&register);
            async move {
                let registration: Registration = decode(args)?;
                store.register(&registration).await.map_err(internal)?;
                Ok(Value::Null)
            }
        })
        .endpoint("discover", move |args| {
            let store = Arc::clone(&discover);
            async move {
                let args: DiscoverArgs = decode(args)?;
                let nodes = store.discover(&args.service, &args.version).await.map_err(internal)?;
                serde_json::to_value(nodes).map_err(internal)
            }
        })
        .endpoint("x_subscribe", move |args| {
            let store = Arc::clone(&subscribe);
            async move {
                let args: SubscribeArgs = decode(args)?;
                store
                    .x_subscribe(&args.host, args.port, &args.node_id, &args.subscriptions)
                    .await
                    .map_err(internal)?;
                Ok(Value::Null)
            }
        })
        .endpoint("get_subscribers", move |args| {
            let store = Arc::clone(&subscribers);
            async move {
                let args: SubscribersArgs = decode(args)?;
                let nodes = store
                    .get_subscribers(&args.service, &args.version, &args.endpoint)
                    .await
                    .map_err(internal)?;
                serde_json::to_value(nodes).map_err(internal)
            }
        })
        .build()
}

pub async fn start_fake_registry() -> FakeRegistry {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    let listener = Listener::from_std(std_listener, 64).unwrap();

    let store = Arc::new(StaticRegistry::new());
    let ctx = ConnectionContext {
        connections: ConnectionRegistry::new(),
        table: Arc::new(CorrelationTable::new()),
        handler: Arc::new(ServiceDispatcher::new(
            vec![registry_service(Arc::clone(&store))],
            SubscriptionSet::default(),
        )),
    };
    let stop = CancellationToken::new();
    tokio::spawn(serve_tcp(listener, ctx, stop.clone()));

    FakeRegistry { addr, store, stop }
}

/// A raw packet-protocol peer for speaking JSON lines directly.
pub struct RawPeer {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (read, write) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    pub async fn send_line(&mut self, line: &str) {
        self.write.write_all(line.as_bytes()).await.unwrap();
        self.write.write_all(b"\n").await.unwrap();
    }

    pub async fn send(&mut self, packet: &Packet) {
        self.send_line(&serde_json::to_string(packet).unwrap()).await;
    }

    /// Next packet, or `None` once the host closed the connection.
    pub async fn recv(&mut self) -> Option<Packet> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("no frame within 5s")
            .ok()??;
        Some(serde_json::from_str(&line).unwrap())
    }
}

/// Poll `condition` every 10ms for up to 5s.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
