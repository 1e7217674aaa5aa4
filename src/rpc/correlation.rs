//! Request/response correlation.
//!
//! # Responsibilities
//! - Map outstanding request ids to the caller waiting on them
//! - Arm one timer per request; first of {response, timeout, connection loss} wins
//! - Hold the in-flight marker that keeps an outbound connection busy
//!
//! # Design Decisions
//! - Entries are inserted before the request is written, so a fast response
//!   can never race ahead of its slot
//! - Resolution removes the entry atomically; later outcomes for the same id are dropped

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::CallError;
use crate::net::{Connection, ConnectionId, InFlightGuard};
use crate::observability::metrics;
use crate::protocol::{Packet, Target};

type Outcome = Result<Value, CallError>;

struct PendingCall {
    connection_id: ConnectionId,
    slot: oneshot::Sender<Outcome>,
    timer: Option<JoinHandle<()>>,
    started: Instant,
    _in_flight: InFlightGuard,
}

/// Outstanding requests awaiting a response, keyed by packet id.
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<String, PendingCall>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a request on `conn` and return a handle resolving to its outcome.
    ///
    /// Refused with `ConnectionLost` if the connection is draining or closed.
    pub fn send_request(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        target: Target,
        payload: Value,
        timeout: Duration,
    ) -> Result<ResponseHandle, CallError> {
        let packet = Packet::request(target, payload);
        let id = packet.id.clone();

        if conn.is_draining() || conn.is_closed() {
            return Err(CallError::ConnectionLost { id });
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingCall {
                connection_id: conn.id(),
                slot: tx,
                timer: None,
                started: Instant::now(),
                _in_flight: conn.begin_request(),
            },
        );
        let timer = spawn_timer(Arc::downgrade(self), id.clone(), timeout);
        match self.pending.get_mut(&id) {
            Some(mut call) => call.timer = Some(timer),
            None => timer.abort(),
        }

        if conn.send(packet).is_err() {
            self.resolve(&id, Err(CallError::ConnectionLost { id: id.clone() }));
        } else {
            tracing::trace!(packet_id = %id, connection_id = %conn.id(), "Request sent");
        }

        Ok(ResponseHandle { id, rx })
    }

    /// Complete the call `id`. Returns false if it was already resolved.
    pub fn resolve(&self, id: &str, outcome: Outcome) -> bool {
        let Some((_, call)) = self.pending.remove(id) else {
            return false;
        };
        let PendingCall {
            slot,
            timer,
            started,
            _in_flight,
            ..
        } = call;
        if let Some(timer) = timer {
            timer.abort();
        }
        // The connection goes idle before the caller observes the outcome.
        drop(_in_flight);

        let label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.as_label(),
        };
        metrics::record_request("outbound", label, started.elapsed());

        // The caller may have given up; that is not our concern.
        let _ = slot.send(outcome);
        true
    }

    /// Route an inbound response packet to its waiting caller.
    pub fn on_response(&self, packet: Packet) {
        let id = packet.id.clone();
        let outcome = packet.into_outcome().map_err(CallError::Remote);
        if !self.resolve(&id, outcome) {
            tracing::warn!(packet_id = %id, "Dropping response with unknown id");
        }
    }

    /// Fail every call outstanding on `conn_id`. Returns how many were failed.
    pub fn on_connection_closed(&self, conn_id: ConnectionId) -> usize {
        let orphaned: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.value().connection_id == conn_id)
            .map(|entry| entry.key().clone())
            .collect();

        orphaned
            .into_iter()
            .filter(|id| self.resolve(id, Err(CallError::ConnectionLost { id: id.clone() })))
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn spawn_timer(table: Weak<CorrelationTable>, id: String, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(table) = table.upgrade() {
            if table.resolve(&id, Err(CallError::RequestTimeout { id: id.clone(), timeout })) {
                tracing::warn!(packet_id = %id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
            }
        }
    })
}

/// The caller's side of an outstanding request.
#[derive(Debug)]
pub struct ResponseHandle {
    id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl ResponseHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the outcome. Exactly one outcome is ever delivered.
    pub async fn wait(self) -> Result<Value, CallError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CallError::ConnectionLost { id: self.id }),
        }
    }
}
