//! HTTP surface subsystem.
//!
//! # Data Flow
//! ```text
//! Inherited HTTP socket (optionally TLS)
//!     → server.rs (axum_server, middleware stack)
//!     → request.rs (x-request-id assigned and echoed)
//!     → routes.rs (ordered (method, path, handler) table, CORS preflight)
//!     → handler response
//! ```

pub mod request;
pub mod routes;
pub mod server;

pub use request::{request_id, X_REQUEST_ID};
pub use routes::{HttpRoute, HttpRoutes};
pub use server::HttpServer;
