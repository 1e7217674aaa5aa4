//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGINT and SIGTERM handlers
//! - Translate either into one shutdown request
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Both signals take the same path; repeats are no-ops once shutdown began

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::Shutdown;

/// The termination signals a host reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        }
    }
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Installed SIGINT/SIGTERM handlers.
#[derive(Debug)]
pub struct SignalListener {
    sigint: Signal,
    sigterm: Signal,
}

impl SignalListener {
    /// Must be called from within a Tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next termination signal.
    pub async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.sigint.recv() => ShutdownSignal::Interrupt,
            _ = self.sigterm.recv() => ShutdownSignal::Terminate,
        }
    }
}

/// Trigger `shutdown` on every SIGINT/SIGTERM for the rest of the process.
///
/// Only the first signal initiates shutdown; later ones are logged.
pub fn forward_to_shutdown(shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
    let mut listener = SignalListener::install()?;
    Ok(tokio::spawn(async move {
        loop {
            let received = listener.recv().await;
            if shutdown.trigger() {
                tracing::info!(signal = %received, "Shutdown requested");
            } else {
                tracing::debug!(signal = %received, "Already shutting down");
            }
        }
    }))
}
