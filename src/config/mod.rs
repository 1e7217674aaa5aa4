//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HostConfig (validated, immutable)
//!     → shared via Arc with every subsystem of a worker
//! ```
//!
//! # Design Decisions
//! - Config is resolved once in the parent; workers re-read the same file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, read_config, ConfigError};
pub use validation::validate_config;
pub use schema::{
    BrokerConfig, DrainConfig, HostConfig, HttpConfig, ListenerConfig, ObservabilityConfig,
    RegistryConfig, ServiceConfig, TimeoutConfig, TlsConfig, WorkerConfig,
};
