//! Error taxonomy shared across subsystems.
//!
//! # Responsibilities
//! - One enum per failure domain (wire, calls, registry, broker, hooks, workers)
//! - Stable snake_case labels for logs and metrics
//! - Normalize every call failure into the single wire shape ([`RemoteError`])
//!
//! # Design Decisions
//! - Per-connection failures never escape the connection that produced them
//! - A failed call is a value (`Err(CallError)`), never a panic or raw I/O error

use std::time::Duration;
use thiserror::Error;

use crate::protocol::{Packet, PacketKind, RemoteError};

/// Boxed error used by user-supplied hooks and handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure to decode or encode a frame. Fatal to the connection, never to the process.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid {kind:?} packet: {reason}")]
    InvalidShape {
        kind: PacketKind,
        reason: &'static str,
    },

    #[error("frame exceeds {max} bytes")]
    FrameTooLong { max: usize },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a remote call that did not produce a successful response.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("request {id} timed out after {timeout:?}")]
    RequestTimeout { id: String, timeout: Duration },

    #[error("connection lost while request {id} was outstanding")]
    ConnectionLost { id: String },

    #[error("remote error ({}): {}", .0.kind, .0.message)]
    Remote(RemoteError),

    #[error("no instance of {service}/{version} is available")]
    NotFound { service: String, version: String },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl CallError {
    /// Short stable label for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CallError::RequestTimeout { .. } => "request_timeout",
            CallError::ConnectionLost { .. } => "connection_lost",
            CallError::Remote(_) => "remote_error",
            CallError::NotFound { .. } => "not_found",
            CallError::Connect { .. } => "connect_failed",
            CallError::Registry(_) => "registry_error",
        }
    }

    /// The wire-level failure shape for this error.
    pub fn to_remote_error(&self) -> RemoteError {
        match self {
            CallError::Remote(remote) => remote.clone(),
            other => RemoteError::new(other.as_label(), other.to_string()),
        }
    }

    /// A `failed` response packet carrying this error under `id`.
    pub fn into_response(self, id: impl Into<String>) -> Packet {
        Packet::failure(id, self.to_remote_error())
    }
}

/// Registry directory call failed.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unreachable at {addr}: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("registry call `{endpoint}` failed: {message}")]
    Call { endpoint: String, message: String },

    #[error("unexpected registry reply for `{endpoint}`: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Publish/subscribe broker failure.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("broker protocol error: {0}")]
    Protocol(String),

    #[error("broker connection closed")]
    Closed,

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// A hard (non-soft) lifecycle hook failed and aborted the sequence that ran it.
#[derive(Debug, Error)]
#[error("`{signal}` hook #{index} failed: {source}")]
pub struct SignalHookFailure {
    pub signal: &'static str,
    pub index: usize,
    #[source]
    pub source: BoxError,
}

/// Worker process and shared socket failures.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to mark socket inheritable: {0}")]
    Inherit(#[from] nix::Error),

    #[error("failed to spawn worker {ordinal}: {source}")]
    Spawn {
        ordinal: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid inherited socket description `{0}`")]
    InvalidEnvironment(String),

    #[error("worker environment is missing the `{0}` socket")]
    MissingSocket(&'static str),

    #[error("signal handler installation failed: {0}")]
    Signals(std::io::Error),
}

/// Top-level error for hosting a service.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Hook(#[from] SignalHookFailure),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Listener(#[from] crate::net::ListenerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::Config(_) => "config_error",
            HostError::Worker(_) => "worker_error",
            HostError::Hook(_) => "signal_hook_failure",
            HostError::Registry(_) => "registry_error",
            HostError::Broker(_) => "broker_error",
            HostError::Listener(_) => "listener_error",
            HostError::Io(_) => "io_error",
        }
    }
}
