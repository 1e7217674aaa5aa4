//! Remote procedure calls over the packet protocol.
//!
//! # Data Flow
//! ```text
//! Outbound: ServiceClient → RpcClient → CorrelationTable → Connection
//! Inbound:  Connection → ServiceDispatcher → TcpService endpoint → response
//! ```
//!
//! # Design Decisions
//! - Responses are matched by correlation id, never by arrival order
//! - Every failure reaches the caller as a `CallError`, and the peer as a
//!   `failed` response

pub mod client;
pub mod correlation;
pub mod server;
pub mod service;

pub use client::{dial, RpcClient, ServiceClient};
pub use correlation::{CorrelationTable, ResponseHandle};
pub use server::{serve_tcp, ServiceDispatcher};
pub use service::{EndpointHandler, TcpService, TcpServiceBuilder};
