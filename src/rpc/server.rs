//! Serving local services over the packet protocol.
//!
//! # Data Flow
//! ```text
//! Listener::accept
//!     → Connection::spawn (Inbound)
//!     → ServiceDispatcher::on_packet
//!         request → TcpService::call → response
//!         publish → SubscriptionSet::deliver → ack
//! ```
//!
//! # Design Decisions
//! - Each request is dispatched on its own task; the connection stays busy
//!   until the response has been queued
//! - A fan-out publish is acknowledged only after its handler succeeds,
//!   and holds the connection busy until then like a request does

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::net::{Connection, ConnectionContext, Direction, Listener, ListenerError, PacketHandler};
use crate::observability::metrics;
use crate::protocol::{Packet, PacketKind, RemoteError, Target};
use crate::pubsub::subscriber::SubscriptionSet;
use crate::rpc::service::TcpService;

/// Routes inbound requests and fan-out publishes to local handlers.
#[derive(Clone, Default)]
pub struct ServiceDispatcher {
    services: Arc<Vec<TcpService>>,
    subscriptions: SubscriptionSet,
}

impl ServiceDispatcher {
    pub fn new(services: Vec<TcpService>, subscriptions: SubscriptionSet) -> Self {
        Self {
            services: Arc::new(services),
            subscriptions,
        }
    }

    pub fn services(&self) -> &[TcpService] {
        &self.services
    }

    /// Resolve and run the endpoint a request targets.
    pub async fn dispatch(&self, target: &Target, args: Value) -> Result<Value, RemoteError> {
        let service = self
            .services
            .iter()
            .find(|s| s.is_for_me(&target.service, &target.version))
            .ok_or_else(|| {
                RemoteError::not_found(format!(
                    "no service {}/{} on this node",
                    target.service, target.version
                ))
            })?;
        service.call(&target.endpoint, args).await
    }

    fn handle_request(&self, conn: &Arc<Connection>, packet: Packet) {
        let in_flight = conn.begin_request();
        let conn = Arc::clone(conn);
        let dispatcher = self.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match &packet.target {
                Some(target) => dispatcher.dispatch(target, packet.payload).await,
                None => Err(RemoteError::invalid_request("request without target")),
            };
            let label = if outcome.is_ok() { "ok" } else { "failed" };
            metrics::record_request("inbound", label, started.elapsed());

            if conn.send(Packet::response(packet.id.clone(), outcome)).is_err() {
                tracing::debug!(
                    connection_id = %conn.id(),
                    request_id = %packet.id,
                    "Connection closed before response could be sent"
                );
            }
            drop(in_flight);
        });
    }

    fn handle_publish(&self, conn: &Arc<Connection>, packet: Packet) {
        let Some(target) = packet.target.clone() else {
            return;
        };
        let in_flight = conn.begin_request();
        let conn = Arc::clone(conn);
        let subscriptions = self.subscriptions.clone();

        tokio::spawn(async move {
            let channel = crate::pubsub::channel_key(&target.service, &target.version, &target.endpoint);
            match subscriptions.deliver(&channel, packet.payload).await {
                Ok(()) => {
                    metrics::record_publish("fanout_received", "ok");
                    let _ = conn.send(Packet::ack(packet.id));
                }
                Err(e) => {
                    metrics::record_publish("fanout_received", "failed");
                    tracing::error!(
                        channel = %channel,
                        publish_id = %packet.id,
                        error = %e,
                        "Fan-out publish not delivered"
                    );
                }
            }
            drop(in_flight);
        });
    }
}

impl PacketHandler for ServiceDispatcher {
    fn on_packet(&self, conn: &Arc<Connection>, packet: Packet) {
        match packet.kind {
            PacketKind::Request => self.handle_request(conn, packet),
            PacketKind::Publish => self.handle_publish(conn, packet),
            PacketKind::Ack | PacketKind::Response => {
                tracing::debug!(
                    connection_id = %conn.id(),
                    kind = ?packet.kind,
                    packet_id = %packet.id,
                    "Ignoring unexpected packet"
                );
            }
        }
    }
}

/// Accept packet connections until `stop` fires.
///
/// Returns the listener so the caller decides when the socket closes.
pub async fn serve_tcp(listener: Listener, ctx: ConnectionContext, stop: CancellationToken) -> Listener {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    Connection::spawn(stream, peer.to_string(), Direction::Inbound, ctx.clone(), Some(permit));
                }
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
    tracing::info!("Stopped accepting packet connections");
    listener
}
