//! Outbound calls to remote services.
//!
//! # Data Flow
//! ```text
//! ServiceClient::call(endpoint, args)
//!     → RpcClient resolves (service, version) via the registry
//!     → pooled connection per node (dialled on first use)
//!     → CorrelationTable::send_request → ResponseHandle::wait
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::config::TimeoutConfig;
use crate::error::CallError;
use crate::net::{Connection, ConnectionContext, ConnectionRegistry, Direction, PacketHandler};
use crate::protocol::Target;
use crate::registry::{NodeAddress, Registry};
use crate::rpc::correlation::CorrelationTable;

/// Open an outbound packet connection to `addr`.
pub async fn dial(
    addr: &str,
    ctx: ConnectionContext,
    connect_timeout: Duration,
) -> Result<Arc<Connection>, std::io::Error> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    let _ = stream.set_nodelay(true);
    Ok(Connection::spawn(stream, addr, Direction::Outbound, ctx, None))
}

/// Resolves services through the registry and multiplexes calls over
/// one connection per remote node.
pub struct RpcClient {
    registry: Arc<dyn Registry>,
    ctx: ConnectionContext,
    pool: DashMap<String, Arc<Connection>>,
    dialing: Mutex<()>,
    cursor: AtomicUsize,
    timeouts: TimeoutConfig,
}

impl RpcClient {
    pub fn new(
        registry: Arc<dyn Registry>,
        table: Arc<CorrelationTable>,
        connections: ConnectionRegistry,
        handler: Arc<dyn PacketHandler>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            registry,
            ctx: ConnectionContext {
                connections,
                table,
                handler,
            },
            pool: DashMap::new(),
            dialing: Mutex::new(()),
            cursor: AtomicUsize::new(0),
            timeouts,
        }
    }

    /// Call `endpoint` on some instance of `service`/`version`.
    pub async fn call(
        &self,
        service: &str,
        version: &str,
        endpoint: &str,
        args: Value,
    ) -> Result<Value, CallError> {
        let node = self.pick_node(service, version).await?;
        let target = Target::new(service, version, endpoint).on_node(node.node_id.clone());
        self.call_node(&node, target, args).await
    }

    /// Call a specific node directly.
    pub async fn call_node(
        &self,
        node: &NodeAddress,
        target: Target,
        args: Value,
    ) -> Result<Value, CallError> {
        let conn = self.connection(&node.socket_addr()).await?;
        let handle = self
            .ctx
            .table
            .send_request(&conn, target, args, self.timeouts.request())?;
        tracing::debug!(
            request_id = %handle.id(),
            node_id = %node.node_id,
            "Calling remote endpoint"
        );
        handle.wait().await
    }

    async fn pick_node(&self, service: &str, version: &str) -> Result<NodeAddress, CallError> {
        let mut nodes = self.registry.discover(service, version).await?;
        if nodes.is_empty() {
            return Err(CallError::NotFound {
                service: service.to_string(),
                version: version.to_string(),
            });
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % nodes.len();
        Ok(nodes.swap_remove(index))
    }

    async fn connection(&self, addr: &str) -> Result<Arc<Connection>, CallError> {
        if let Some(conn) = self.live(addr) {
            return Ok(conn);
        }

        // Serialize dials so concurrent first calls share one connection.
        let _dialing = self.dialing.lock().await;
        if let Some(conn) = self.live(addr) {
            return Ok(conn);
        }

        let conn = dial(addr, self.ctx.clone(), self.timeouts.connect())
            .await
            .map_err(|source| CallError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        tracing::debug!(connection_id = %conn.id(), address = %addr, "Pooled new connection");
        self.pool.insert(addr.to_string(), Arc::clone(&conn));
        Ok(conn)
    }

    fn live(&self, addr: &str) -> Option<Arc<Connection>> {
        let conn = self.pool.get(addr).map(|entry| Arc::clone(entry.value()))?;
        if conn.is_closed() || conn.is_draining() {
            self.pool.remove(addr);
            return None;
        }
        Some(conn)
    }

    /// Close every pooled connection.
    pub fn close_all(&self) {
        for entry in self.pool.iter() {
            entry.value().close();
        }
        self.pool.clear();
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.len()
    }
}

/// A handle bound to one remote `(service, version)`.
#[derive(Clone)]
pub struct ServiceClient {
    service: String,
    version: String,
    rpc: Arc<RpcClient>,
}

impl ServiceClient {
    pub fn new(rpc: Arc<RpcClient>, service: impl AsRef<str>, version: impl ToString) -> Self {
        Self {
            service: service.as_ref().to_lowercase(),
            version: version.to_string(),
            rpc,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub async fn call(&self, endpoint: &str, args: Value) -> Result<Value, CallError> {
        self.rpc.call(&self.service, &self.version, endpoint, args).await
    }
}
