//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events under a per-process root span)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint (parent process)
//! ```
//!
//! # Design Decisions
//! - Connection, request and publish ids travel as structured fields
//! - Metrics are cheap facade calls; nothing is recorded until a recorder
//!   is installed

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, process_span, worker_identifier, LogFormat};
