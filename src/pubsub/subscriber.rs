//! Local subscription handlers and dispatch.
//!
//! # Design Decisions
//! - Handlers are registered explicitly per endpoint; no introspection
//! - A message for an unknown channel is logged and dropped, never propagated

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::error::BoxError;
use crate::pubsub::channel::{ChannelKey, InvalidChannelKey};
use crate::registry::SubscriptionSpec;

/// Future returned by a subscription handler.
pub type SubscriptionFuture = BoxFuture<'static, Result<(), BoxError>>;

/// Invoked with the channel and the decoded payload of each message.
pub type SubscriptionHandler = Arc<dyn Fn(ChannelKey, Value) -> SubscriptionFuture + Send + Sync>;

/// Strategy forwarded to the registry when none is given.
pub const DEFAULT_STRATEGY: &str = "designation";

/// Handlers for events published by one `(service, version)`.
#[derive(Clone)]
pub struct Subscriber {
    service: String,
    version: String,
    strategy: String,
    handlers: BTreeMap<String, SubscriptionHandler>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("service", &self.service)
            .field("version", &self.version)
            .field("strategy", &self.strategy)
            .field("endpoints", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Subscriber {
    /// Subscribe to events published by `service`/`version`. The name is lowercased.
    pub fn builder(service: impl AsRef<str>, version: impl ToString) -> SubscriberBuilder {
        SubscriberBuilder {
            subscriber: Subscriber {
                service: service.as_ref().to_lowercase(),
                version: version.to_string(),
                strategy: DEFAULT_STRATEGY.to_string(),
                handlers: BTreeMap::new(),
            },
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn channel_keys(&self) -> Vec<ChannelKey> {
        self.handlers
            .keys()
            .map(|endpoint| ChannelKey::new(&self.service, &self.version, endpoint))
            .collect()
    }

    /// What to announce to the registry for fan-out delivery.
    pub fn specs(&self) -> Vec<SubscriptionSpec> {
        self.handlers
            .keys()
            .map(|endpoint| SubscriptionSpec {
                service: self.service.clone(),
                version: self.version.clone(),
                endpoint: endpoint.clone(),
                strategy: self.strategy.clone(),
            })
            .collect()
    }

    fn handler_for(&self, key: &ChannelKey) -> Option<&SubscriptionHandler> {
        if key.service != self.service || key.version != self.version {
            return None;
        }
        self.handlers.get(&key.endpoint)
    }
}

/// Builder for [`Subscriber`].
pub struct SubscriberBuilder {
    subscriber: Subscriber,
}

impl SubscriberBuilder {
    /// Handle events published on `endpoint`.
    pub fn on<F, Fut>(mut self, endpoint: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ChannelKey, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: SubscriptionHandler = Arc::new(move |key, payload| handler(key, payload).boxed());
        self.subscriber.handlers.insert(endpoint.into(), handler);
        self
    }

    /// Delivery strategy announced to the registry. Opaque to this crate.
    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.subscriber.strategy = strategy.into();
        self
    }

    pub fn build(self) -> Subscriber {
        self.subscriber
    }
}

/// Why a message could not be handed to a handler.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    InvalidKey(#[from] InvalidChannelKey),

    #[error("no handler subscribed to `{0}`")]
    NoHandler(ChannelKey),

    #[error("handler for `{key}` failed: {source}")]
    Handler {
        key: ChannelKey,
        #[source]
        source: BoxError,
    },
}

/// Every subscriber hosted by this process.
#[derive(Clone, Default)]
pub struct SubscriptionSet {
    subscribers: Arc<Vec<Subscriber>>,
}

impl SubscriptionSet {
    pub fn new(subscribers: Vec<Subscriber>) -> Self {
        Self {
            subscribers: Arc::new(subscribers),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.iter().all(|s| s.handlers.is_empty())
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    pub fn channel_keys(&self) -> Vec<ChannelKey> {
        self.subscribers.iter().flat_map(Subscriber::channel_keys).collect()
    }

    pub fn specs(&self) -> Vec<SubscriptionSpec> {
        self.subscribers.iter().flat_map(Subscriber::specs).collect()
    }

    fn lookup(&self, key: &ChannelKey) -> Option<SubscriptionHandler> {
        self.subscribers
            .iter()
            .find_map(|s| s.handler_for(key))
            .cloned()
    }

    /// Run the handler for `channel` to completion.
    pub async fn deliver(&self, channel: &str, payload: Value) -> Result<(), DeliveryError> {
        let key: ChannelKey = channel.parse()?;
        let handler = self
            .lookup(&key)
            .ok_or_else(|| DeliveryError::NoHandler(key.clone()))?;
        handler(key.clone(), payload)
            .await
            .map_err(|source| DeliveryError::Handler { key, source })
    }

    /// Deliver, logging instead of returning any failure.
    pub async fn dispatch(&self, channel: String, payload: Value) {
        if let Err(e) = self.deliver(&channel, payload).await {
            tracing::error!(channel = %channel, error = %e, "Dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn recording(tx: mpsc::UnboundedSender<(ChannelKey, Value)>) -> Subscriber {
        Subscriber::builder("X", 1)
            .on("onEvent", move |key, payload| {
                let tx = tx.clone();
                async move {
                    tx.send((key, payload)).map_err(|e| Box::new(e) as BoxError)
                }
            })
            .build()
    }

    #[tokio::test]
    async fn delivers_to_matching_handler() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let set = SubscriptionSet::new(vec![recording(tx)]);

        set.deliver("x/1/onEvent", json!({"n": 1})).await.unwrap();
        let (key, payload) = rx.recv().await.unwrap();
        assert_eq!(key.to_string(), "x/1/onEvent");
        assert_eq!(payload, json!({"n": 1}));
    }

    #[tokio::test]
    async fn unmatched_channel_is_an_error_not_a_panic() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let set = SubscriptionSet::new(vec![recording(tx)]);

        assert!(matches!(
            set.deliver("x/1/other", json!(null)).await,
            Err(DeliveryError::NoHandler(_))
        ));
        assert!(matches!(
            set.deliver("x/2/onEvent", json!(null)).await,
            Err(DeliveryError::NoHandler(_))
        ));
        assert!(matches!(
            set.deliver("garbage", json!(null)).await,
            Err(DeliveryError::InvalidKey(_))
        ));
    }

    #[test]
    fn specs_carry_strategy() {
        let subscriber = Subscriber::builder("billing", "2")
            .strategy("leader")
            .on("charged", |_, _| async { Ok(()) })
            .build();
        let specs = subscriber.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].endpoint, "charged");
        assert_eq!(specs[0].strategy, "leader");
        assert_eq!(subscriber.channel_keys()[0].to_string(), "billing/2/charged");
    }
}
