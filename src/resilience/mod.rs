//! Resilience subsystem.
//!
//! # Design Decisions
//! - Broker reconnects back off exponentially with up to 10% jitter
//! - Call deadlines live with the correlation table, not here

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
