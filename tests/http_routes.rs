//! HTTP routes served alongside the packet listener.

use axum::extract::Path;
use axum::Json;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use microhost::{Host, HttpRoutes};

mod common;

fn routes() -> HttpRoutes {
    HttpRoutes::new()
        .get("/ping", || async { Json(json!({"pong": true})) })
        .post("/echo/{name}", |Path(name): Path<String>, Json(body): Json<Value>| async move {
            Json(json!({"name": name, "body": body}))
        })
}

async fn start(allow_cross_domain: bool) -> common::RunningHost {
    let mut config = common::local_config("web");
    config.http.enabled = true;
    config.http.allow_cross_domain = allow_cross_domain;
    common::start_host(Host::new(config).http_routes(routes())).await
}

#[tokio::test]
async fn routes_answer_with_request_ids() {
    let host = start(false).await;
    let base = format!("http://{}", host.http_addr.unwrap());
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/ping")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(!response.headers().contains_key("access-control-allow-origin"));
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"pong": true}));

    let response = client
        .post(format!("{base}/echo/alice"))
        .header("x-request-id", "req-42")
        .json(&json!([1, 2]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");
    assert_eq!(
        response.json::<Value>().await.unwrap(),
        json!({"name": "alice", "body": [1, 2]})
    );

    let response = client.get(format!("{base}/missing")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    host.stop().await;
}

#[tokio::test]
async fn cross_domain_hosts_answer_preflight() {
    let host = start(true).await;
    let base = format!("http://{}", host.http_addr.unwrap());
    let client = reqwest::Client::new();

    let response = client
        .request(Method::OPTIONS, format!("{base}/ping"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-methods"], "GET, OPTIONS");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let response = client.get(format!("{base}/ping")).send().await.unwrap();
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    host.stop().await;
}

#[tokio::test]
async fn http_listener_closes_on_shutdown() {
    let host = start(false).await;
    let addr = host.http_addr.unwrap();
    host.stop().await;

    let result = reqwest::Client::new().get(format!("http://{addr}/ping")).send().await;
    assert!(result.is_err());
}
