//! Ordered HTTP route table.
//!
//! # Design Decisions
//! - Routes are registered explicitly, in order, as (method, path, handler)
//! - Several methods on one path share a single axum `MethodRouter`
//! - With cross-domain enabled every path gets an `OPTIONS` preflight route
//!   unless one was registered explicitly

use axum::handler::Handler;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Router;

/// One registered route.
pub struct HttpRoute {
    method: Method,
    path: String,
    router: MethodRouter,
}

impl std::fmt::Debug for HttpRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

impl HttpRoute {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Routes in registration order.
#[derive(Debug, Default)]
pub struct HttpRoutes {
    routes: Vec<HttpRoute>,
}

impl HttpRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(Method::GET, MethodFilter::GET, path, handler)
    }

    pub fn post<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(Method::POST, MethodFilter::POST, path, handler)
    }

    pub fn put<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(Method::PUT, MethodFilter::PUT, path, handler)
    }

    pub fn patch<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(Method::PATCH, MethodFilter::PATCH, path, handler)
    }

    pub fn delete<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(Method::DELETE, MethodFilter::DELETE, path, handler)
    }

    pub fn options<H, T>(self, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.add(Method::OPTIONS, MethodFilter::OPTIONS, path, handler)
    }

    fn add<H, T>(mut self, method: Method, filter: MethodFilter, path: &str, handler: H) -> Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.routes.push(HttpRoute {
            method,
            path: path.to_string(),
            router: on(filter, handler),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HttpRoute> {
        self.routes.iter()
    }

    /// Build the axum router, optionally with CORS preflight support.
    pub fn into_router(self, allow_cross_domain: bool) -> Router {
        let mut grouped: Vec<(String, Vec<Method>, MethodRouter)> = Vec::new();
        for route in self.routes {
            match grouped.iter_mut().find(|(path, _, _)| *path == route.path) {
                Some((_, methods, router)) => {
                    methods.push(route.method);
                    *router = std::mem::take(router).merge(route.router);
                }
                None => grouped.push((route.path, vec![route.method], route.router)),
            }
        }

        let mut app = Router::new();
        for (path, methods, mut router) in grouped {
            if allow_cross_domain && !methods.contains(&Method::OPTIONS) {
                let allowed = allowed_methods(&methods);
                router = router.options(move || async move { preflight(&allowed) });
            }
            tracing::debug!(path = %path, methods = ?methods, "Registered HTTP route");
            app = app.route(&path, router);
        }

        if allow_cross_domain {
            app = app.layer(axum::middleware::map_response(allow_any_origin));
        }
        app
    }
}

fn allowed_methods(methods: &[Method]) -> String {
    let mut names: Vec<&str> = methods.iter().map(Method::as_str).collect();
    names.push("OPTIONS");
    names.join(", ")
}

fn preflight(allowed: &str) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(allowed) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
    }
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

async fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn routes() -> HttpRoutes {
        HttpRoutes::new()
            .get("/ping", || async { "pong" })
            .post("/ping", || async { StatusCode::CREATED })
            .get("/other", || async { "other" })
    }

    async fn send(app: Router, method: Method, path: &str) -> Response {
        app.oneshot(Request::builder().method(method).uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn keeps_registration_order() {
        let routes = routes();
        let listed: Vec<_> = routes.iter().map(|r| (r.method().clone(), r.path().to_string())).collect();
        assert_eq!(
            listed,
            vec![
                (Method::GET, "/ping".to_string()),
                (Method::POST, "/ping".to_string()),
                (Method::GET, "/other".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn methods_on_one_path_are_merged() {
        let app = routes().into_router(false);
        assert_eq!(send(app.clone(), Method::GET, "/ping").await.status(), StatusCode::OK);
        assert_eq!(send(app.clone(), Method::POST, "/ping").await.status(), StatusCode::CREATED);
        assert_eq!(
            send(app, Method::DELETE, "/ping").await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn preflight_lists_the_paths_methods() {
        let app = routes().into_router(true);
        let response = send(app.clone(), Method::OPTIONS, "/ping").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, OPTIONS"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let response = send(app, Method::GET, "/other").await;
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn no_cors_headers_unless_enabled() {
        let app = routes().into_router(false);
        let response = send(app.clone(), Method::GET, "/ping").await;
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(
            send(app, Method::OPTIONS, "/ping").await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
