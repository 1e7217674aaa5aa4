//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the axum router from the ordered route table
//! - Wire up middleware (request id, tracing, timeout)
//! - Serve on an inherited listening socket, with TLS when configured
//! - Stop gracefully through an `axum_server::Handle`

use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use axum_server::Handle;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{HttpConfig, TlsConfig};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::routes::HttpRoutes;
use crate::net::tls::load_tls_config;

/// The HTTP surface of one worker.
pub struct HttpServer {
    router: Router,
    tls: Option<TlsConfig>,
}

impl HttpServer {
    pub fn new(routes: HttpRoutes, config: &HttpConfig, request_timeout: Duration) -> Self {
        Self {
            router: Self::build_router(routes, config.allow_cross_domain, request_timeout),
            tls: config.tls.clone(),
        }
    }

    #[allow(deprecated)]
    fn build_router(routes: HttpRoutes, allow_cross_domain: bool, request_timeout: Duration) -> Router {
        routes.into_router(allow_cross_domain).layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                        request_id = %request_id(req).unwrap_or("unknown"),
                    )
                }))
                .layer(propagate_request_id_layer())
                .layer(TimeoutLayer::new(request_timeout)),
        )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `handle` is told to shut down.
    pub async fn serve(self, listener: std::net::TcpListener, handle: Handle) -> std::io::Result<()> {
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let app = self.router.into_make_service();

        match self.tls {
            Some(tls) => {
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                tracing::info!(address = %addr, "HTTPS server starting");
                axum_server::from_tcp_rustls(listener, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum_server::from_tcp(listener).handle(handle).serve(app).await?;
            }
        }

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }
}
