//! Registry client speaking the packet protocol.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::TimeoutConfig;
use crate::error::{CallError, RegistryError};
use crate::net::{Connection, ConnectionContext, ConnectionRegistry, ResponsesOnly};
use crate::protocol::Target;
use crate::registry::{NodeAddress, Registration, Registry, SubscriberNode, SubscriptionSpec};
use crate::rpc::client::dial;
use crate::rpc::correlation::CorrelationTable;

/// Service name the registry process answers to.
pub const REGISTRY_SERVICE: &str = "registry";
/// Registry protocol version.
pub const REGISTRY_VERSION: &str = "1";

/// Talks to a registry process over one lazily dialled connection.
pub struct TcpRegistryClient {
    addr: String,
    ctx: ConnectionContext,
    conn: Mutex<Option<Arc<Connection>>>,
    timeouts: TimeoutConfig,
}

impl TcpRegistryClient {
    pub fn new(addr: impl Into<String>, connections: ConnectionRegistry, timeouts: TimeoutConfig) -> Self {
        Self {
            addr: addr.into(),
            ctx: ConnectionContext {
                connections,
                table: Arc::new(CorrelationTable::new()),
                handler: Arc::new(ResponsesOnly),
            },
            conn: Mutex::new(None),
            timeouts,
        }
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    async fn connection(&self) -> Result<Arc<Connection>, RegistryError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref().filter(|c| !c.is_closed() && !c.is_draining()) {
            return Ok(Arc::clone(conn));
        }

        let conn = dial(&self.addr, self.ctx.clone(), self.timeouts.connect())
            .await
            .map_err(|source| RegistryError::Unreachable {
                addr: self.addr.clone(),
                source,
            })?;
        tracing::debug!(address = %self.addr, connection_id = %conn.id(), "Connected to registry");
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    async fn call(&self, endpoint: &str, args: Value) -> Result<Value, RegistryError> {
        let conn = self.connection().await?;
        let target = Target::new(REGISTRY_SERVICE, REGISTRY_VERSION, endpoint);
        let outcome = match self
            .ctx
            .table
            .send_request(&conn, target, args, self.timeouts.request())
        {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };

        outcome.map_err(|e| {
            tracing::warn!(endpoint = %endpoint, error = %e, "Registry call failed");
            match e {
                CallError::Registry(inner) => inner,
                other => RegistryError::Call {
                    endpoint: endpoint.to_string(),
                    message: other.to_string(),
                },
            }
        })
    }

    async fn call_as<T: DeserializeOwned>(&self, endpoint: &str, args: Value) -> Result<T, RegistryError> {
        let value = self.call(endpoint, args).await?;
        serde_json::from_value(value).map_err(|source| RegistryError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[async_trait]
impl Registry for TcpRegistryClient {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        let args = serde_json::to_value(registration).map_err(|source| RegistryError::Decode {
            endpoint: "register".to_string(),
            source,
        })?;
        self.call("register", args).await.map(|_| ())
    }

    async fn discover(&self, service: &str, version: &str) -> Result<Vec<NodeAddress>, RegistryError> {
        self.call_as("discover", json!({"service": service, "version": version}))
            .await
    }

    async fn x_subscribe(
        &self,
        host: &str,
        port: u16,
        node_id: &str,
        subscriptions: &[SubscriptionSpec],
    ) -> Result<(), RegistryError> {
        let args = json!({
            "host": host,
            "port": port,
            "node_id": node_id,
            "subscriptions": subscriptions,
        });
        self.call("x_subscribe", args).await.map(|_| ())
    }

    async fn get_subscribers(
        &self,
        service: &str,
        version: &str,
        endpoint: &str,
    ) -> Result<Vec<SubscriberNode>, RegistryError> {
        self.call_as(
            "get_subscribers",
            json!({"service": service, "version": version, "endpoint": endpoint}),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_registry_is_reported() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = TcpRegistryClient::new(
            format!("127.0.0.1:{port}"),
            ConnectionRegistry::new(),
            TimeoutConfig::default(),
        );

        let err = client.discover("echo", "1").await.unwrap_err();
        assert!(matches!(err, RegistryError::Unreachable { .. }));
    }
}
