//! Publish/subscribe subsystem.
//!
//! # Data Flow
//! ```text
//! Broker path (fire-and-forget):
//!     Publisher::publish → PubSubBus → Broker (redis / memory)
//!     Broker → PubSubBus subscription loop → SubscriptionSet::dispatch (spawned)
//!
//! Fan-out path (acknowledged):
//!     FanoutPublisher → registry.get_subscribers → direct `publish` packet
//!     subscriber's ServiceDispatcher → handler → `ack` → PendingPublish removed
//! ```
//!
//! # Design Decisions
//! - Channels are addressed as `service/version/endpoint`, joined verbatim
//! - The bus reconnects on its own; only the operation that needed the
//!   broker sees a failure
//! - Handlers never run inline on a subscription loop

pub mod broker;
pub mod bus;
pub mod channel;
pub mod fanout;
pub mod memory;
pub mod publisher;
pub mod redis;
pub mod resp;
pub mod subscriber;

pub use broker::{Broker, BrokerMessage};
pub use bus::{BusSubscription, PubSubBus};
pub use channel::{channel_key, ChannelKey, InvalidChannelKey};
pub use fanout::{FanoutPublisher, PendingPublish, PendingPublishes};
pub use memory::MemoryBroker;
pub use publisher::Publisher;
pub use redis::RedisBroker;
pub use subscriber::{DeliveryError, Subscriber, SubscriberBuilder, SubscriptionHandler, SubscriptionSet};
