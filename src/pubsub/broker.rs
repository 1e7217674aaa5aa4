//! Broker abstraction.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;

/// Buffered messages per subscription before the broker side waits.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// One message delivered on a subscribed channel. `payload` is raw JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// A publish/subscribe broker reachable by this process.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Establish the publishing connection.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Submit `payload` on `channel`. Success means the broker took it,
    /// not that anyone received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError>;

    /// Open one long-lived subscription over all `channels`.
    ///
    /// The stream ends only when the receiver is dropped; transient broker
    /// disconnects are handled behind it.
    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError>;
}
