//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (per worker):
//!     listeners up → registry registration → hooks.rs `service_ready` hooks
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown.rs trigger (idempotent)
//!
//! Shutdown (per worker):
//!     stop accepting → drain.rs (idle, grace, force) → close sockets → stop loops
//! ```
//!
//! # Design Decisions
//! - A hard hook failure is fatal to startup; soft ones are logged
//! - Shutdown has a bounded grace period: forced teardown after the deadline

pub mod drain;
pub mod hooks;
pub mod shutdown;
pub mod signals;

pub use drain::{DrainReport, DrainSupervisor};
pub use hooks::{LifecycleSignal, ServiceReady, Signals};
pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::{forward_to_shutdown, ShutdownSignal, SignalListener};
