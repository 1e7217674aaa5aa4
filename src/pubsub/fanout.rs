//! Acknowledged fan-out publish to concrete subscriber nodes.
//!
//! # Data Flow
//! ```text
//! FanoutPublisher::publish(endpoint, payload)
//!     → Registry::get_subscribers (one call per publish)
//!     → dial each distinct subscriber node
//!     → send `publish` packet, record PendingPublish under its id
//!     → subscriber replies `ack` → entry removed, connection closed
//! ```
//!
//! # Design Decisions
//! - No retry and no expiry: an unacknowledged publish stays pending
//!   (observable through `pending_count` and the pending gauge)

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

use crate::error::RegistryError;
use crate::net::{Connection, ConnectionContext, ConnectionRegistry, PacketHandler};
use crate::observability::metrics;
use crate::protocol::{Packet, PacketKind, Target};
use crate::registry::{Registry, SubscriberNode};
use crate::rpc::client::dial;
use crate::rpc::correlation::CorrelationTable;

/// A fan-out delivery awaiting its acknowledgement.
#[derive(Debug)]
pub struct PendingPublish {
    pub publish_id: String,
    pub subscriber: SubscriberNode,
    pub connection: Arc<Connection>,
    pub sent_at: Instant,
}

/// Outstanding fan-out deliveries, keyed by publish id.
#[derive(Debug, Default)]
pub struct PendingPublishes {
    entries: DashMap<String, PendingPublish>,
}

impl PendingPublishes {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, pending: PendingPublish) {
        self.entries.insert(pending.publish_id.clone(), pending);
        metrics::set_pending_publishes(self.entries.len());
    }

    /// Settle the publish `id`. Returns false for unknown or repeated acks.
    pub fn on_ack(&self, id: &str) -> bool {
        let Some((_, pending)) = self.entries.remove(id) else {
            tracing::warn!(publish_id = %id, "Ack for unknown publish");
            return false;
        };
        metrics::set_pending_publishes(self.entries.len());
        tracing::debug!(
            publish_id = %id,
            node_id = %pending.subscriber.node_id,
            elapsed_ms = pending.sent_at.elapsed().as_millis() as u64,
            "Publish acknowledged"
        );
        pending.connection.close();
        true
    }

    /// Forget a publish that never reached the wire.
    fn discard(&self, id: &str) {
        if self.entries.remove(id).is_some() {
            metrics::set_pending_publishes(self.entries.len());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PacketHandler for PendingPublishes {
    fn on_packet(&self, conn: &Arc<Connection>, packet: Packet) {
        if packet.kind == PacketKind::Ack {
            self.on_ack(&packet.id);
        } else {
            tracing::debug!(
                connection_id = %conn.id(),
                kind = ?packet.kind,
                "Ignoring non-ack packet on fan-out connection"
            );
        }
    }
}

/// Publishes directly to every registered subscriber of a channel.
pub struct FanoutPublisher {
    service: String,
    version: String,
    registry: Arc<dyn Registry>,
    pending: Arc<PendingPublishes>,
    ctx: ConnectionContext,
    connect_timeout: Duration,
}

impl FanoutPublisher {
    pub fn new(
        service: impl AsRef<str>,
        version: impl ToString,
        registry: Arc<dyn Registry>,
        connections: ConnectionRegistry,
        connect_timeout: Duration,
    ) -> Self {
        let pending = Arc::new(PendingPublishes::new());
        Self {
            service: service.as_ref().to_lowercase(),
            version: version.to_string(),
            registry,
            ctx: ConnectionContext {
                connections,
                table: Arc::new(CorrelationTable::new()),
                handler: Arc::clone(&pending) as Arc<dyn PacketHandler>,
            },
            pending,
            connect_timeout,
        }
    }

    /// Send `payload` on `endpoint` to each distinct subscriber node.
    ///
    /// Returns the publish ids now awaiting acknowledgement. Unreachable
    /// subscribers are logged and skipped.
    pub async fn publish(&self, endpoint: &str, payload: Value) -> Result<Vec<String>, RegistryError> {
        let subscribers = self
            .registry
            .get_subscribers(&self.service, &self.version, endpoint)
            .await?;

        let mut seen = HashSet::new();
        let mut sent = Vec::new();
        for subscriber in subscribers {
            if !seen.insert(subscriber.node_id.clone()) {
                continue;
            }

            let addr = subscriber.socket_addr();
            let conn = match dial(&addr, self.ctx.clone(), self.connect_timeout).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(
                        node_id = %subscriber.node_id,
                        address = %addr,
                        error = %e,
                        "Subscriber unreachable"
                    );
                    metrics::record_publish("fanout", "unreachable");
                    continue;
                }
            };

            if let Some(publish_id) = self.send_publish(conn, subscriber, endpoint, payload.clone()) {
                sent.push(publish_id);
            }
        }

        Ok(sent)
    }

    /// Send one publish packet on `conn` and track it until acked.
    fn send_publish(
        &self,
        conn: Arc<Connection>,
        subscriber: SubscriberNode,
        endpoint: &str,
        payload: Value,
    ) -> Option<String> {
        let target = Target::new(&self.service, &self.version, endpoint).on_node(subscriber.node_id.clone());
        let packet = Packet::publish(target, payload);
        let publish_id = packet.id.clone();

        // Recorded first so an immediate ack finds its entry.
        self.pending.insert(PendingPublish {
            publish_id: publish_id.clone(),
            subscriber,
            connection: Arc::clone(&conn),
            sent_at: Instant::now(),
        });
        if conn.send(packet).is_err() {
            self.pending.discard(&publish_id);
            tracing::warn!(publish_id = %publish_id, "Connection closed before publish was sent");
            metrics::record_publish("fanout", "failed");
            return None;
        }
        metrics::record_publish("fanout", "sent");
        Some(publish_id)
    }

    pub fn pending(&self) -> &Arc<PendingPublishes> {
        &self.pending
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
