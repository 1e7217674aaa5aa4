//! In-process broker on a broadcast channel.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::BrokerError;
use crate::pubsub::broker::{Broker, BrokerMessage, SUBSCRIPTION_BUFFER};

/// Default broadcast capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broker confined to one process. Used when no external broker is configured, and in tests.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    sender: broadcast::Sender<BrokerMessage>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let message = BrokerMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        // No receivers is not a failed submission.
        let receivers = self.sender.send(message).unwrap_or(0);
        tracing::trace!(channel = %channel, receivers, "Published in memory");
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        let wanted: HashSet<String> = channels.iter().cloned().collect();
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    received = source.recv() => match received {
                        Ok(message) if wanted.contains(&message.channel) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Ok(rx)
    }
}
