//! Multi-process workers over shared listening sockets.
//!
//! # Data Flow
//! ```text
//! parent                               worker n
//! ──────                               ────────
//! sockets.rs bind (once)
//! orchestrator.rs spawn × N ─────────▶ runtime.rs adopt sockets, serve
//! orchestrator.rs supervise ◀──exit─── runtime.rs drain on SIGTERM/SIGINT
//! ```
//!
//! # Design Decisions
//! - Workers are re-executions of the host binary, told their role through
//!   the environment
//! - Nothing but the listening sockets is shared between processes

pub mod orchestrator;
pub mod runtime;
pub mod sockets;

pub use orchestrator::{ExitKind, Orchestrator, WorkerCommand, WorkerExit, WorkerProcess, WORKER_ENV};
pub use runtime::{WorkerEnv, WorkerRuntime};
pub use sockets::{bind_inheritable, SharedSockets, SocketRole, LISTEN_FDS_ENV};
