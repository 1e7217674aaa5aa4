//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber once per process
//! - Pick pretty or JSON output from configuration
//! - Provide the root span that names the process (`service-ordinal`)
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level when set
//! - A second `init_logging` in the same process keeps the first subscriber

use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(format!("{level},tower_http=info"))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the process-wide subscriber and return the root span for
/// `identifier`.
///
/// Returns false in the second element when a subscriber was already
/// installed.
pub fn init_logging(config: &ObservabilityConfig, identifier: &str) -> (Span, bool) {
    let filter = env_filter(&config.log_level);
    let format = LogFormat::parse(&config.log_format).unwrap_or(LogFormat::Pretty);

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()
            .is_ok(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .is_ok(),
    };

    (process_span(identifier), installed)
}

/// Span carrying the process identifier; instrument the process's main
/// future with it.
pub fn process_span(identifier: &str) -> Span {
    tracing::info_span!("process", id = %identifier)
}

/// Identifier of worker `ordinal` of `service`.
pub fn worker_identifier(service: &str, ordinal: usize) -> String {
    format!("{service}-{ordinal}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn second_init_is_a_no_op() {
        let config = ObservabilityConfig::default();
        let _ = init_logging(&config, "first");
        let (_, installed) = init_logging(&config, "second");
        assert!(!installed);
    }

    #[test]
    fn worker_identifiers() {
        assert_eq!(worker_identifier("echo", 0), "echo-0");
        assert_eq!(worker_identifier("echo", 3), "echo-3");
    }
}
