//! Publishing events under this service's identity.

use std::sync::Arc;

use serde::Serialize;

use crate::pubsub::bus::PubSubBus;
use crate::pubsub::channel::channel_key;

/// Publishes on `service/version/endpoint` channels owned by one service.
#[derive(Clone)]
pub struct Publisher {
    service: String,
    version: String,
    bus: Arc<PubSubBus>,
}

impl Publisher {
    /// The name is lowercased.
    pub fn new(bus: Arc<PubSubBus>, service: impl AsRef<str>, version: impl ToString) -> Self {
        Self {
            service: service.as_ref().to_lowercase(),
            version: version.to_string(),
            bus,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn channel(&self, endpoint: &str) -> String {
        channel_key(&self.service, &self.version, endpoint)
    }

    /// Publish `payload` on `endpoint`. Returns whether the broker accepted it.
    pub async fn publish<T: Serialize + ?Sized>(&self, endpoint: &str, payload: &T) -> bool {
        self.bus.publish(&self.channel(endpoint), payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::memory::MemoryBroker;
    use crate::pubsub::Broker;
    use serde_json::json;

    #[tokio::test]
    async fn publishes_on_own_channel() {
        let broker = Arc::new(MemoryBroker::new());
        let mut rx = broker.subscribe(&["orders/2/created".to_string()]).await.unwrap();

        let publisher = Publisher::new(Arc::new(PubSubBus::new(broker)), "Orders", 2);
        assert!(publisher.publish("created", &json!({"id": 7})).await);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.channel, "orders/2/created");
        assert_eq!(message.payload, "{\"id\":7}");
    }
}
