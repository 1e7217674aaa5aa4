//! Service discovery directory interface.
//!
//! # Responsibilities
//! - Announce this node's services on startup
//! - Resolve `(service, version)` to concrete nodes for outbound calls
//! - Record and look up fan-out subscribers
//!
//! # Design Decisions
//! - Every registry call is a best-effort RPC with no built-in retry
//! - The directory's own storage and consistency are not our concern;
//!   [`StaticRegistry`] stands in for it in ronin mode and tests

pub mod static_registry;
pub mod tcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub use static_registry::StaticRegistry;
pub use tcp::TcpRegistryClient;

/// What a node announces about one hosted service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub service: String,
    pub version: String,
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub endpoints: Vec<String>,
}

/// Where a service instance can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
    pub node_id: String,
}

impl NodeAddress {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One `(service, version, endpoint)` a node wants fan-out publishes for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub service: String,
    pub version: String,
    pub endpoint: String,
    pub strategy: String,
}

/// A node subscribed to a channel, as reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberNode {
    pub host: String,
    pub port: u16,
    pub node_id: String,
    pub strategy: String,
}

impl SubscriberNode {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The four calls made against the discovery directory.
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError>;

    async fn discover(&self, service: &str, version: &str) -> Result<Vec<NodeAddress>, RegistryError>;

    async fn x_subscribe(
        &self,
        host: &str,
        port: u16,
        node_id: &str,
        subscriptions: &[SubscriptionSpec],
    ) -> Result<(), RegistryError>;

    async fn get_subscribers(
        &self,
        service: &str,
        version: &str,
        endpoint: &str,
    ) -> Result<Vec<SubscriberNode>, RegistryError>;
}
