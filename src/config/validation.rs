//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Reject identities that would corrupt channel keys
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::HostConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &HostConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    }
    for (field, value) in [
        ("service.name", &config.service.name),
        ("service.version", &config.service.version),
    ] {
        if value.contains('/') {
            errors.push(ValidationError::new(field, "must not contain '/'"));
        }
    }

    check_addr(&mut errors, "tcp.bind_address", &config.tcp.bind_address);
    if config.tcp.max_connections == 0 {
        errors.push(ValidationError::new("tcp.max_connections", "must be at least 1"));
    }

    if config.http.enabled {
        check_addr(&mut errors, "http.bind_address", &config.http.bind_address);
        if let Some(tls) = &config.http.tls {
            if tls.cert_path.is_empty() || tls.key_path.is_empty() {
                errors.push(ValidationError::new(
                    "http.tls",
                    "cert_path and key_path are both required",
                ));
            }
        }
    }

    if config.workers.count == 0 {
        errors.push(ValidationError::new("workers.count", "must be at least 1"));
    }

    if !config.registry.ronin && config.registry.port == 0 {
        errors.push(ValidationError::new("registry.port", "must not be 0"));
    }

    if config.broker.enabled {
        if config.broker.port == 0 {
            errors.push(ValidationError::new("broker.port", "must not be 0"));
        }
        if config.broker.reconnect_base_ms > config.broker.reconnect_max_ms {
            errors.push(ValidationError::new(
                "broker.reconnect_base_ms",
                "must not exceed reconnect_max_ms",
            ));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.drain.tick_ms == 0 {
        errors.push(ValidationError::new("drain.tick_ms", "must be greater than 0"));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unknown format `{}`", config.observability.log_format),
        ));
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if let Err(e) = value.parse::<SocketAddr>() {
        errors.push(ValidationError::new(field, format!("`{value}` is not a socket address: {e}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&HostConfig::default()).is_ok());
    }

    #[test]
    fn slash_in_identity_is_rejected() {
        let mut config = HostConfig::default();
        config.service.version = "1/2".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "service.version");
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = HostConfig::default();
        config.observability.metrics_address = "bogus".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut config = HostConfig::default();
        config.observability.log_format = "xml".into();
        assert!(validate_config(&config).is_err());
    }
}
