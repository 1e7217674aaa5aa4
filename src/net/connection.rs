//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Drive one framed duplex stream (reader task + writer task)
//! - Track the pipeline state (idle iff nothing awaits a response)
//! - Route inbound responses to the correlation table, everything else to a handler
//! - Resolve outstanding calls with `ConnectionLost` when the stream goes away
//!
//! # States
//! ```text
//! Open ──begin_drain──▶ Draining ──close──▶ Closed
//!   │                       │
//!   └──────── abort ────────┴──────────────▶ Closed (forced, queue dropped)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::net::listener::ConnectionPermit;
use crate::observability::metrics;
use crate::protocol::{Packet, PacketCodec, PacketKind};
use crate::rpc::correlation::CorrelationTable;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted on one of our listeners; we answer requests.
    Inbound,
    /// Dialled by us; we send requests and await responses.
    Outbound,
}

/// Whether any request on this connection is still awaiting its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Busy,
}

/// The connection was already closed when a packet was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Receives every non-response packet read from a connection.
///
/// Called inline on the reader task: implementations must not block and
/// should spawn for anything slower than a map lookup.
pub trait PacketHandler: Send + Sync + 'static {
    fn on_packet(&self, conn: &Arc<Connection>, packet: Packet);
}

/// Handler for connections that only expect responses.
#[derive(Debug, Default)]
pub struct ResponsesOnly;

impl PacketHandler for ResponsesOnly {
    fn on_packet(&self, conn: &Arc<Connection>, packet: Packet) {
        tracing::debug!(
            connection_id = %conn.id(),
            kind = ?packet.kind,
            packet_id = %packet.id,
            "Ignoring unexpected packet"
        );
    }
}

/// Everything a connection driver needs besides the stream itself.
#[derive(Clone)]
pub struct ConnectionContext {
    pub connections: ConnectionRegistry,
    pub table: Arc<CorrelationTable>,
    pub handler: Arc<dyn PacketHandler>,
}

/// A live duplex channel carrying packets.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: String,
    direction: Direction,
    outbound: mpsc::UnboundedSender<Packet>,
    in_flight: Arc<AtomicUsize>,
    draining: AtomicBool,
    forced: AtomicBool,
    stop_reading: CancellationToken,
    closing: CancellationToken,
}

impl Connection {
    /// Start driving `io` and register the connection.
    ///
    /// The returned handle stays valid after the stream closes; sends then fail
    /// with [`ConnectionClosed`].
    pub fn spawn<S>(
        io: S,
        peer: impl Into<String>,
        direction: Direction,
        ctx: ConnectionContext,
        permit: Option<ConnectionPermit>,
    ) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (tx, rx) = mpsc::unbounded_channel();

        let conn = Arc::new(Connection {
            id: ConnectionId::new(),
            peer: peer.into(),
            direction,
            outbound: tx,
            in_flight: Arc::new(AtomicUsize::new(0)),
            draining: AtomicBool::new(false),
            forced: AtomicBool::new(false),
            stop_reading: CancellationToken::new(),
            closing: CancellationToken::new(),
        });

        let guard = ctx.connections.register(Arc::clone(&conn));
        tracing::debug!(
            connection_id = %conn.id,
            peer = %conn.peer,
            direction = ?direction,
            "Connection opened"
        );

        tokio::spawn(write_loop(
            Arc::clone(&conn),
            FramedWrite::new(write_half, PacketCodec::new()),
            rx,
        ));

        let reader = Arc::clone(&conn);
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;
            read_loop(&reader, FramedRead::new(read_half, PacketCodec::new()), &ctx).await;
            reader.closing.cancel();

            let lost = ctx.table.on_connection_closed(reader.id);
            tracing::debug!(
                connection_id = %reader.id,
                forced = reader.forced.load(Ordering::SeqCst),
                lost_calls = lost,
                "Connection closed"
            );
        });

        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Queue a packet for the writer task.
    pub fn send(&self, packet: Packet) -> Result<(), ConnectionClosed> {
        if self.closing.is_cancelled() {
            return Err(ConnectionClosed);
        }
        self.outbound.send(packet).map_err(|_| ConnectionClosed)
    }

    /// Mark one request as in flight until the guard drops.
    pub fn begin_request(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            counter: Arc::clone(&self.in_flight),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn pipeline_state(&self) -> PipelineState {
        if self.in_flight() == 0 {
            PipelineState::Idle
        } else {
            PipelineState::Busy
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pipeline_state() == PipelineState::Idle
    }

    /// Stop taking on new work.
    ///
    /// Inbound connections stop reading (no new requests are accepted);
    /// outbound connections keep reading responses but refuse new requests.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        if self.direction == Direction::Inbound {
            self.stop_reading.cancel();
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Close gracefully: queued packets are flushed first.
    pub fn close(&self) {
        self.closing.cancel();
    }

    /// Tear down immediately, dropping anything still queued.
    pub fn abort(&self) {
        self.forced.store(true, Ordering::SeqCst);
        self.closing.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Resolves once the connection starts closing.
    pub async fn closed(&self) {
        self.closing.cancelled().await
    }
}

/// RAII marker for one in-flight request.
#[derive(Debug)]
pub struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn read_loop<S>(
    conn: &Arc<Connection>,
    mut frames: FramedRead<ReadHalf<S>, PacketCodec>,
    ctx: &ConnectionContext,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        tokio::select! {
            _ = conn.closing.cancelled() => return,
            _ = conn.stop_reading.cancelled() => {
                // Read side is shut; stay registered until someone closes us.
                conn.closing.cancelled().await;
                return;
            }
            frame = frames.next() => match frame {
                Some(Ok(packet)) if packet.kind == PacketKind::Response => {
                    ctx.table.on_response(packet);
                }
                Some(Ok(packet)) => ctx.handler.on_packet(conn, packet),
                Some(Err(e)) => {
                    tracing::warn!(
                        connection_id = %conn.id,
                        peer = %conn.peer,
                        error = %e,
                        "Protocol error, closing connection"
                    );
                    return;
                }
                None => {
                    tracing::trace!(connection_id = %conn.id, "Peer closed the stream");
                    return;
                }
            }
        }
    }
}

async fn write_loop<S>(
    conn: Arc<Connection>,
    mut sink: FramedWrite<WriteHalf<S>, PacketCodec>,
    mut rx: mpsc::UnboundedReceiver<Packet>,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        tokio::select! {
            biased;
            packet = rx.recv() => {
                let Some(packet) = packet else { break };
                if let Err(e) = sink.send(packet).await {
                    tracing::warn!(connection_id = %conn.id, error = %e, "Write failed, closing connection");
                    conn.closing.cancel();
                    break;
                }
            }
            _ = conn.closing.cancelled() => {
                if !conn.forced.load(Ordering::SeqCst) {
                    while let Ok(packet) = rx.try_recv() {
                        if sink.feed(packet).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.flush().await;
                }
                break;
            }
        }
    }

    let mut write_half = sink.into_inner();
    let _ = write_half.shutdown().await;
}

/// Tracks live connections for draining.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    live: Arc<DashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live connection. It is forgotten when the guard drops.
    pub fn register(&self, conn: Arc<Connection>) -> ConnectionGuard {
        let id = conn.id();
        self.live.insert(id, conn);
        metrics::set_active_connections(self.live.len());
        ConnectionGuard {
            live: Arc::clone(&self.live),
            id,
        }
    }

    pub fn active_count(&self) -> usize {
        self.live.len()
    }

    /// Split the connections that are not already closing into `(idle, busy)`.
    pub fn partition(&self) -> (Vec<Arc<Connection>>, Vec<Arc<Connection>>) {
        self.live
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|conn| !conn.is_closed())
            .partition(|conn| conn.is_idle())
    }

    /// Wait until every registered connection has been forgotten.
    pub async fn wait_until_empty(&self, poll: Duration) {
        while !self.live.is_empty() {
            tokio::time::sleep(poll).await;
        }
    }
}

/// Removes a connection from its registry when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    live: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.live.remove(&self.id);
        metrics::set_active_connections(self.live.len());
        tracing::trace!(connection_id = %self.id, "Connection forgotten");
    }
}
