//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML, and every
//! field has a default so a minimal file (or no file) is enough to run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a service host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HostConfig {
    /// Identity of the hosted service.
    pub service: ServiceConfig,

    /// Packet-protocol listener.
    pub tcp: ListenerConfig,

    /// HTTP listener.
    pub http: HttpConfig,

    /// Worker process settings.
    pub workers: WorkerConfig,

    /// Discovery directory.
    pub registry: RegistryConfig,

    /// Publish/subscribe broker.
    pub broker: BrokerConfig,

    /// Call timeouts.
    pub timeouts: TimeoutConfig,

    /// Shutdown draining.
    pub drain: DrainConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Identity announced to the registry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name (lowercased when hosted).
    pub name: String,

    /// Service version.
    pub version: String,

    /// Host name peers should dial to reach this node.
    pub host_name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "microhost".to_string(),
            version: "1".to_string(),
            host_name: "127.0.0.1".to_string(),
        }
    }
}

/// Packet-protocol listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8001").
    pub bind_address: String,

    /// Maximum concurrent connections per worker (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8001".to_string(),
            max_connections: 10_000,
        }
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Serve HTTP routes at all.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Answer CORS preflight requests and add permissive CORS headers.
    pub allow_cross_domain: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8000".to_string(),
            tls: None,
            allow_cross_domain: false,
        }
    }
}

/// TLS configuration for the HTTP listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker processes sharing the listening sockets.
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: 1 }
    }
}

/// Discovery directory configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,

    /// Run without a registry: no registration, no discovery.
    pub ronin: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4500,
            ronin: false,
        }
    }
}

impl RegistryConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Publish/subscribe broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Connect to a broker at startup.
    pub enabled: bool,

    pub host: String,
    pub port: u16,

    /// Base delay for reconnect backoff in milliseconds.
    pub reconnect_base_ms: u64,

    /// Maximum delay for reconnect backoff in milliseconds.
    pub reconnect_max_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 6379,
            reconnect_base_ms: 100,
            reconnect_max_ms: 5_000,
        }
    }
}

impl BrokerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time to wait for a response in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Grace period applied to busy connections on shutdown.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Poll interval in milliseconds.
    pub tick_ms: u64,

    /// Number of polls before busy connections are torn down.
    pub ticks: u32,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            ticks: 5,
        }
    }
}

impl DrainConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
