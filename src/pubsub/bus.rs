//! Bridge between local publish/subscribe calls and the broker.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::BrokerError;
use crate::observability::metrics;
use crate::pubsub::broker::Broker;

/// Publishes JSON payloads and runs subscription loops over one broker.
#[derive(Clone)]
pub struct PubSubBus {
    broker: Arc<dyn Broker>,
}

impl PubSubBus {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.broker.connect().await
    }

    /// Serialize `payload` and hand it to the broker.
    ///
    /// Returns whether the broker accepted the submission.
    pub async fn publish<T: Serialize + ?Sized>(&self, channel: &str, payload: &T) -> bool {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(channel = %channel, error = %e, "Payload is not serializable");
                metrics::record_publish("broker", "failed");
                return false;
            }
        };

        match self.broker.publish(channel, &text).await {
            Ok(()) => {
                tracing::debug!(channel = %channel, "Published");
                metrics::record_publish("broker", "ok");
                true
            }
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Publish failed");
                metrics::record_publish("broker", "failed");
                false
            }
        }
    }

    /// Run one subscription loop over `channels`.
    ///
    /// Each message is handed to `handler` on its own task; the loop never
    /// waits for a handler to finish.
    pub async fn subscribe<F, Fut>(
        &self,
        channels: Vec<String>,
        handler: F,
    ) -> Result<BusSubscription, BrokerError>
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut messages = self.broker.subscribe(&channels).await?;
        tracing::info!(channels = ?channels, "Subscribed");

        let task = tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                match serde_json::from_str::<Value>(&message.payload) {
                    Ok(payload) => {
                        tokio::spawn(handler(message.channel, payload));
                    }
                    Err(e) => {
                        tracing::warn!(channel = %message.channel, error = %e, "Dropping non-JSON message");
                    }
                }
            }
        });

        Ok(BusSubscription { task })
    }
}

/// A running subscription loop.
#[derive(Debug)]
pub struct BusSubscription {
    task: JoinHandle<()>,
}

impl BusSubscription {
    /// Stop the loop. Handlers already scheduled keep running.
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::memory::MemoryBroker;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{mpsc, Notify};

    #[tokio::test]
    async fn slow_handler_does_not_block_next_message() {
        let bus = PubSubBus::new(Arc::new(MemoryBroker::new()));
        let release = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let gate = Arc::clone(&release);
        let _subscription = bus
            .subscribe(vec!["x/1/onEvent".into()], move |_, payload| {
                let gate = Arc::clone(&gate);
                let tx = tx.clone();
                async move {
                    if payload == json!("slow") {
                        gate.notified().await;
                    }
                    let _ = tx.send(payload);
                }
            })
            .await
            .unwrap();

        assert!(bus.publish("x/1/onEvent", "slow").await);
        assert!(bus.publish("x/1/onEvent", "fast").await);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(first, Some(json!("fast")));

        release.notify_one();
        assert_eq!(rx.recv().await, Some(json!("slow")));
    }

    #[tokio::test]
    async fn stopped_subscription_ends_its_loop() {
        let bus = PubSubBus::new(Arc::new(MemoryBroker::new()));
        let subscription = bus
            .subscribe(vec!["x/1/onEvent".into()], |_, _| async {})
            .await
            .unwrap();
        assert!(!subscription.is_finished());
        subscription.stop();
    }
}
