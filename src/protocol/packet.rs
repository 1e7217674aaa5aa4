//! Packet shapes exchanged between service nodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Generate a fresh correlation token.
///
/// Random (UUID v4, simple hex form), never sequential.
pub fn new_packet_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The four packet kinds carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    Request,
    Response,
    Publish,
    Ack,
}

/// Addressing for requests and publishes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Target {
    pub service: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub endpoint: String,
}

impl Target {
    pub fn new(
        service: impl Into<String>,
        version: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            node_id: None,
            endpoint: endpoint.into(),
        }
    }

    /// Pin the target to a concrete node.
    pub fn on_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

/// Structured failure carried by a `failed` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal", message)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub id: String,
    pub kind: PacketKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

impl Packet {
    /// A request with a freshly generated id.
    pub fn request(target: Target, payload: Value) -> Self {
        Self {
            id: new_packet_id(),
            kind: PacketKind::Request,
            target: Some(target),
            payload,
            error: None,
            failed: false,
        }
    }

    /// A successful response to request `id`.
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: PacketKind::Response,
            target: None,
            payload,
            error: None,
            failed: false,
        }
    }

    /// A failed response to request `id`.
    pub fn failure(id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            id: id.into(),
            kind: PacketKind::Response,
            target: None,
            payload: Value::Null,
            error: Some(error),
            failed: true,
        }
    }

    /// Build the response for `id` from an endpoint outcome.
    pub fn response(id: impl Into<String>, outcome: Result<Value, RemoteError>) -> Self {
        match outcome {
            Ok(payload) => Self::success(id, payload),
            Err(error) => Self::failure(id, error),
        }
    }

    /// A publish with a freshly generated publish id.
    pub fn publish(target: Target, payload: Value) -> Self {
        Self {
            id: new_packet_id(),
            kind: PacketKind::Publish,
            target: Some(target),
            payload,
            error: None,
            failed: false,
        }
    }

    /// Acknowledge publish `id`.
    pub fn ack(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: PacketKind::Ack,
            target: None,
            payload: Value::Null,
            error: None,
            failed: false,
        }
    }

    /// Check the per-kind shape rules.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let invalid = |reason| {
            Err(ProtocolError::InvalidShape {
                kind: self.kind,
                reason,
            })
        };

        if self.id.is_empty() {
            return invalid("empty id");
        }

        match self.kind {
            PacketKind::Request | PacketKind::Publish => {
                let Some(target) = &self.target else {
                    return invalid("missing target");
                };
                if target.service.is_empty() || target.endpoint.is_empty() {
                    return invalid("target needs a service and an endpoint");
                }
                if self.failed || self.error.is_some() {
                    return invalid("only responses can carry an error");
                }
            }
            PacketKind::Response => match (&self.error, self.failed) {
                (Some(_), true) if !self.payload.is_null() => {
                    return invalid("failed response carries a payload");
                }
                (Some(_), false) => return invalid("error without failed flag"),
                (None, true) => return invalid("failed flag without error"),
                _ => {}
            },
            PacketKind::Ack => {
                if self.failed || self.error.is_some() {
                    return invalid("ack cannot carry an error");
                }
            }
        }
        Ok(())
    }

    /// Split a response into the caller-facing outcome.
    pub fn into_outcome(self) -> Result<Value, RemoteError> {
        match self.error {
            Some(error) => Err(error),
            None if self.failed => Err(RemoteError::internal("failed response without error")),
            None => Ok(self.payload),
        }
    }
}
