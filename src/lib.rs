//! Microservice hosting substrate.
//!
//! Services expose endpoints over a newline-delimited JSON packet protocol,
//! publish and consume events through a broker, and run as several worker
//! processes sharing the same listening sockets with graceful draining on
//! shutdown.

pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod pubsub;
pub mod registry;
pub mod resilience;
pub mod rpc;
pub mod worker;

pub use config::HostConfig;
pub use error::{BoxError, CallError, HostError};
pub use host::{Host, HostContext};
pub use http::HttpRoutes;
pub use lifecycle::Shutdown;
pub use protocol::{Packet, PacketKind, RemoteError, Target};
pub use pubsub::{Publisher, Subscriber};
pub use rpc::{ServiceClient, TcpService};
