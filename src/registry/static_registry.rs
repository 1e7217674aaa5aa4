//! In-process registry.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::RegistryError;
use crate::pubsub::channel::ChannelKey;
use crate::registry::{NodeAddress, Registration, Registry, SubscriberNode, SubscriptionSpec};

/// A registry held entirely in memory.
///
/// Serves ronin mode (peers configured up front) and tests.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    nodes: DashMap<(String, String), Vec<NodeAddress>>,
    subscribers: DashMap<ChannelKey, Vec<SubscriberNode>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a known node for `(service, version)`.
    pub fn with_node(self, service: &str, version: &str, node: NodeAddress) -> Self {
        self.add_node(service, version, node);
        self
    }

    fn add_node(&self, service: &str, version: &str, node: NodeAddress) {
        let mut nodes = self
            .nodes
            .entry((service.to_lowercase(), version.to_string()))
            .or_default();
        nodes.retain(|existing| existing.node_id != node.node_id);
        nodes.push(node);
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        self.add_node(
            &registration.service,
            &registration.version,
            NodeAddress {
                host: registration.host.clone(),
                port: registration.port,
                node_id: registration.node_id.clone(),
            },
        );
        Ok(())
    }

    async fn discover(&self, service: &str, version: &str) -> Result<Vec<NodeAddress>, RegistryError> {
        Ok(self
            .nodes
            .get(&(service.to_lowercase(), version.to_string()))
            .map(|nodes| nodes.clone())
            .unwrap_or_default())
    }

    async fn x_subscribe(
        &self,
        host: &str,
        port: u16,
        node_id: &str,
        subscriptions: &[SubscriptionSpec],
    ) -> Result<(), RegistryError> {
        for spec in subscriptions {
            let key = ChannelKey::new(&spec.service, &spec.version, &spec.endpoint);
            let mut nodes = self.subscribers.entry(key).or_default();
            nodes.retain(|existing| existing.node_id != node_id);
            nodes.push(SubscriberNode {
                host: host.to_string(),
                port,
                node_id: node_id.to_string(),
                strategy: spec.strategy.clone(),
            });
        }
        Ok(())
    }

    async fn get_subscribers(
        &self,
        service: &str,
        version: &str,
        endpoint: &str,
    ) -> Result<Vec<SubscriberNode>, RegistryError> {
        Ok(self
            .subscribers
            .get(&ChannelKey::new(service, version, endpoint))
            .map(|nodes| nodes.clone())
            .unwrap_or_default())
    }
}
