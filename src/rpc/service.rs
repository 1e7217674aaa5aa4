//! Locally hosted TCP services and their endpoints.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::protocol::RemoteError;

/// Future returned by an endpoint handler.
pub type EndpointFuture = BoxFuture<'static, Result<Value, RemoteError>>;

/// A remote-callable endpoint.
pub type EndpointHandler = Arc<dyn Fn(Value) -> EndpointFuture + Send + Sync>;

/// A named, versioned set of endpoints served over the packet protocol.
#[derive(Clone)]
pub struct TcpService {
    name: String,
    version: String,
    endpoints: BTreeMap<String, EndpointHandler>,
}

impl std::fmt::Debug for TcpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpService")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TcpService {
    /// Start describing a service. The name is lowercased.
    pub fn builder(name: impl AsRef<str>, version: impl ToString) -> TcpServiceBuilder {
        TcpServiceBuilder {
            service: TcpService {
                name: name.as_ref().to_lowercase(),
                version: version.to_string(),
                endpoints: BTreeMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Endpoint names, sorted.
    pub fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    /// Whether a request addressed to `(service, version)` belongs here.
    pub fn is_for_me(&self, service: &str, version: &str) -> bool {
        self.name.eq_ignore_ascii_case(service) && self.version == version
    }

    /// Invoke `endpoint` with `args`.
    pub async fn call(&self, endpoint: &str, args: Value) -> Result<Value, RemoteError> {
        match self.endpoints.get(endpoint) {
            Some(handler) => handler(args).await,
            None => Err(RemoteError::not_found(format!(
                "{}/{} has no endpoint `{endpoint}`",
                self.name, self.version
            ))),
        }
    }
}

/// Builder for [`TcpService`].
pub struct TcpServiceBuilder {
    service: TcpService,
}

impl TcpServiceBuilder {
    /// Register `handler` under `name`. A later registration replaces an earlier one.
    pub fn endpoint<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        let handler: EndpointHandler = Arc::new(move |args| handler(args).boxed());
        self.service.endpoints.insert(name.into(), handler);
        self
    }

    pub fn build(self) -> TcpService {
        self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_service() -> TcpService {
        TcpService::builder("Echo", 1)
            .endpoint("echo", |args| async move { Ok(args) })
            .endpoint("fail", |_| async { Err(RemoteError::internal("boom")) })
            .build()
    }

    #[test]
    fn name_is_lowercased_and_version_stringified() {
        let service = echo_service();
        assert_eq!(service.name(), "echo");
        assert_eq!(service.version(), "1");
        assert!(service.is_for_me("ECHO", "1"));
        assert!(!service.is_for_me("echo", "2"));
        assert_eq!(service.endpoint_names(), vec!["echo", "fail"]);
    }

    #[tokio::test]
    async fn dispatches_to_registered_endpoint() {
        let service = echo_service();
        assert_eq!(service.call("echo", json!("hi")).await, Ok(json!("hi")));
        assert_eq!(
            service.call("fail", json!(null)).await,
            Err(RemoteError::internal("boom"))
        );
    }

    #[tokio::test]
    async fn unknown_endpoint_is_not_found() {
        let err = echo_service().call("nope", json!(null)).await.unwrap_err();
        assert_eq!(err.kind, "not_found");
        assert!(err.message.contains("nope"));
    }
}
