//! Connection draining on shutdown.
//!
//! # Phases
//! ```text
//! 1. idle connections       → closed immediately
//! 2. busy connections       → stop reading, poll every tick; close as each goes idle
//! 3. still busy after grace → torn down; their pending calls fail with ConnectionLost
//! ```
//!
//! In-flight work that outlives the grace period is abandoned, not retried.

use std::sync::Arc;
use std::time::Duration;

use crate::config::DrainConfig;
use crate::net::{Connection, ConnectionRegistry};

/// What a drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Idle at signal time, closed in phase 1.
    pub idle_closed: usize,
    /// Went idle (or were closed by the peer) during the grace period.
    pub drained: usize,
    /// Torn down when the grace period ran out.
    pub forced: usize,
}

/// Sheds a worker's live connections in three phases.
#[derive(Debug, Clone)]
pub struct DrainSupervisor {
    connections: ConnectionRegistry,
    tick: Duration,
    ticks: u32,
}

impl DrainSupervisor {
    pub fn new(connections: ConnectionRegistry, config: &DrainConfig) -> Self {
        Self::with_grace(connections, config.tick(), config.ticks)
    }

    pub fn with_grace(connections: ConnectionRegistry, tick: Duration, ticks: u32) -> Self {
        Self {
            connections,
            tick,
            ticks,
        }
    }

    /// Upper bound on how long `drain` waits for busy connections.
    pub fn grace_period(&self) -> Duration {
        self.tick * self.ticks
    }

    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        let (idle, busy) = self.connections.partition();

        for conn in &idle {
            conn.begin_drain();
            conn.close();
        }
        report.idle_closed = idle.len();

        for conn in &busy {
            conn.begin_drain();
        }
        tracing::info!(
            idle = idle.len(),
            busy = busy.len(),
            grace_ms = self.grace_period().as_millis() as u64,
            "Draining connections"
        );

        let mut remaining: Vec<Arc<Connection>> = busy;
        for _ in 0..self.ticks {
            if remaining.is_empty() {
                break;
            }
            tokio::time::sleep(self.tick).await;
            remaining.retain(|conn| {
                if conn.is_closed() {
                    report.drained += 1;
                    false
                } else if conn.is_idle() {
                    conn.close();
                    report.drained += 1;
                    false
                } else {
                    true
                }
            });
        }

        for conn in &remaining {
            tracing::warn!(
                connection_id = %conn.id(),
                peer = %conn.peer(),
                in_flight = conn.in_flight(),
                "Grace period expired, tearing down connection"
            );
            conn.abort();
        }
        report.forced = remaining.len();

        tracing::info!(
            idle_closed = report.idle_closed,
            drained = report.drained,
            forced = report.forced,
            "Drain complete"
        );
        report
    }
}
