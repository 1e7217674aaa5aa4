//! Request/response over real sockets between hosts.

use std::time::Duration;

use serde_json::json;

use microhost::error::CallError;
use microhost::protocol::{Packet, PacketKind, Target};
use microhost::registry::Registry;
use microhost::{Host, HostContext, RemoteError, TcpService};

mod common;

fn echo_service(name: &str) -> TcpService {
    TcpService::builder(name, "1")
        .endpoint("echo", |args| async move { Ok(args) })
        .endpoint("slow", |args| async move {
            let millis = args.as_u64().unwrap_or(5_000);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!(millis))
        })
        .endpoint("fail", |_| async { Err(RemoteError::new("bad_input", "nope")) })
        .build()
}

#[tokio::test]
async fn raw_request_is_answered_under_its_id() {
    let host = common::start_host(Host::new(common::local_config("x")).tcp_service(echo_service("x"))).await;

    let mut peer = common::RawPeer::connect(host.tcp_addr).await;
    peer.send_line(r#"{"id":"r1","kind":"request","target":{"service":"x","version":"1","endpoint":"echo"},"payload":"hi"}"#)
        .await;

    let response = peer.recv().await.unwrap();
    assert_eq!(response, Packet::success("r1", json!("hi")));
    host.stop().await;
}

#[tokio::test]
async fn failures_come_back_as_failed_responses() {
    let host = common::start_host(Host::new(common::local_config("x")).tcp_service(echo_service("x"))).await;
    let mut peer = common::RawPeer::connect(host.tcp_addr).await;

    peer.send(&Packet::request(Target::new("x", "1", "missing"), json!(null))).await;
    let response = peer.recv().await.unwrap();
    assert_eq!(response.kind, PacketKind::Response);
    assert!(response.failed);
    assert_eq!(response.error.unwrap().kind, "not_found");

    peer.send(&Packet::request(Target::new("x", "2", "echo"), json!(null))).await;
    assert_eq!(peer.recv().await.unwrap().error.unwrap().kind, "not_found");

    peer.send(&Packet::request(Target::new("x", "1", "fail"), json!(null))).await;
    let response = peer.recv().await.unwrap();
    assert_eq!(response.error, Some(RemoteError::new("bad_input", "nope")));
    assert!(response.payload.is_null());

    host.stop().await;
}

#[tokio::test]
async fn malformed_frame_closes_only_that_connection() {
    let host = common::start_host(Host::new(common::local_config("x")).tcp_service(echo_service("x"))).await;

    let mut bad = common::RawPeer::connect(host.tcp_addr).await;
    let mut good = common::RawPeer::connect(host.tcp_addr).await;

    bad.send_line("{this is not json").await;
    assert_eq!(bad.recv().await, None);

    good.send(&Packet::request(Target::new("x", "1", "echo"), json!(7))).await;
    assert_eq!(good.recv().await.unwrap().payload, json!(7));

    host.stop().await;
}

#[tokio::test]
async fn clients_discover_services_through_the_registry() {
    let registry = common::start_fake_registry().await;

    let mut server_config = common::local_config("x");
    common::use_registry(&mut server_config, registry.addr);
    let host = common::start_host(Host::new(server_config).tcp_service(echo_service("x"))).await;

    let nodes = registry.store.discover("x", "1").await.unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].port, host.tcp_addr.port());

    let mut client_config = common::local_config("y");
    common::use_registry(&mut client_config, registry.addr);
    let client = HostContext::new(client_config).client("x", "1");

    assert_eq!(client.call("echo", json!("hi")).await.unwrap(), json!("hi"));
    let err = client.call("fail", json!(null)).await.unwrap_err();
    assert!(matches!(err, CallError::Remote(ref e) if e.kind == "bad_input"));

    host.stop().await;
}

#[tokio::test]
async fn concurrent_calls_resolve_out_of_order() {
    let registry = common::start_fake_registry().await;
    let mut server_config = common::local_config("x");
    common::use_registry(&mut server_config, registry.addr);
    let host = common::start_host(Host::new(server_config).tcp_service(echo_service("x"))).await;

    let mut client_config = common::local_config("y");
    common::use_registry(&mut client_config, registry.addr);
    let context = HostContext::new(client_config);
    let client = context.client("x", "1");

    let (slow, fast) = tokio::join!(client.call("slow", json!(300)), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.call("echo", json!("fast")).await
    });
    assert_eq!(slow.unwrap(), json!(300));
    assert_eq!(fast.unwrap(), json!("fast"));
    assert_eq!(context.rpc().pooled_count(), 1);
    assert_eq!(context.table().pending_count(), 0);

    host.stop().await;
}

#[tokio::test]
async fn slow_endpoint_times_out_once() {
    let registry = common::start_fake_registry().await;
    let mut server_config = common::local_config("x");
    common::use_registry(&mut server_config, registry.addr);
    let host = common::start_host(Host::new(server_config).tcp_service(echo_service("x"))).await;

    let mut client_config = common::local_config("y");
    common::use_registry(&mut client_config, registry.addr);
    client_config.timeouts.request_secs = 1;
    let context = HostContext::new(client_config);

    let err = context.client("x", "1").call("slow", json!(3_000)).await.unwrap_err();
    assert!(matches!(err, CallError::RequestTimeout { .. }));
    assert_eq!(context.table().pending_count(), 0);

    host.stop().await;
}

#[tokio::test]
async fn unknown_service_is_not_found() {
    let registry = common::start_fake_registry().await;
    let mut config = common::local_config("y");
    common::use_registry(&mut config, registry.addr);

    let err = HostContext::new(config).client("nobody", "1").call("echo", json!(null)).await.unwrap_err();
    assert!(matches!(err, CallError::NotFound { .. }));
}
