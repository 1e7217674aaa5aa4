//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inherited listening socket
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (framed duplex, pipeline state, draining)
//!     → PacketHandler (rpc server) / CorrelationTable (responses)
//!
//! Connection States:
//!     Open → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Every connection is tracked so shutdown can drain it
//! - A protocol error closes the offending connection only
//! - TLS applies to the HTTP surface; the packet transport is plain TCP

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{
    Connection, ConnectionClosed, ConnectionContext, ConnectionId, ConnectionRegistry,
    Direction, InFlightGuard, PacketHandler, PipelineState, ResponsesOnly,
};
pub use listener::{ConnectionPermit, Listener, ListenerError};
