//! Graceful shutdown of a host with live packet connections.

use std::time::Duration;

use serde_json::json;

use microhost::lifecycle::DrainReport;
use microhost::protocol::{Packet, PacketKind, Target};
use microhost::{Host, Subscriber, TcpService};

mod common;

fn slow_service() -> TcpService {
    TcpService::builder("x", "1")
        .endpoint("sleep", |args| async move {
            let millis = args.as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(json!(millis))
        })
        .build()
}

#[tokio::test]
async fn idle_connections_close_and_stuck_ones_are_forced() {
    let host = Host::new(common::local_config("x")).tcp_service(slow_service());
    let context = host.context();
    let running = common::start_host(host).await;

    let mut idle = Vec::new();
    for _ in 0..3 {
        idle.push(common::RawPeer::connect(running.tcp_addr).await);
    }
    let mut busy = common::RawPeer::connect(running.tcp_addr).await;
    busy.send(&Packet::request(Target::new("x", "1", "sleep"), json!(10_000))).await;

    assert!(common::eventually(|| context.connections().active_count() == 4).await);
    assert!(common::eventually(|| context.connections().partition().1.len() == 1).await);

    let report = running.stop().await;
    assert_eq!(
        report,
        DrainReport {
            idle_closed: 3,
            drained: 0,
            forced: 1,
        }
    );

    for peer in &mut idle {
        assert_eq!(peer.recv().await, None);
    }
    assert_eq!(busy.recv().await, None);
    assert!(common::eventually(|| context.connections().active_count() == 0).await);
}

#[tokio::test]
async fn request_finishing_within_grace_is_answered() {
    let mut config = common::local_config("x");
    config.drain.ticks = 20;
    let host = Host::new(config).tcp_service(slow_service());
    let context = host.context();
    let running = common::start_host(host).await;

    let mut peer = common::RawPeer::connect(running.tcp_addr).await;
    let request = Packet::request(Target::new("x", "1", "sleep"), json!(200));
    peer.send(&request).await;
    assert!(common::eventually(|| context.connections().partition().1.len() == 1).await);

    let report = running.stop().await;
    assert_eq!(report.drained, 1);
    assert_eq!(report.forced, 0);

    assert_eq!(peer.recv().await, Some(Packet::success(request.id, json!(200))));
    assert_eq!(peer.recv().await, None);
}

#[tokio::test]
async fn shutdown_without_connections_reports_nothing() {
    let running = common::start_host(Host::new(common::local_config("x")).tcp_service(slow_service())).await;
    let addr = running.tcp_addr;

    assert_eq!(running.stop().await, DrainReport::default());
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn fanout_publish_in_progress_is_acked_before_close() {
    let mut config = common::local_config("listener");
    config.drain.ticks = 10;
    let subscriber = Subscriber::builder("x", "1")
        .on("onEvent", |_key, _payload| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<(), microhost::BoxError>(())
        })
        .build();
    let host = Host::new(config).subscriber(subscriber);
    let context = host.context();
    let running = common::start_host(host).await;

    let mut peer = common::RawPeer::connect(running.tcp_addr).await;
    let publish = Packet::publish(Target::new("x", "1", "onEvent"), json!({"n": 1}));
    peer.send(&publish).await;
    assert!(common::eventually(|| context.connections().partition().1.len() == 1).await);

    let report = running.stop().await;
    assert_eq!(report.idle_closed, 0);
    assert_eq!(report.drained, 1);

    let ack = peer.recv().await.unwrap();
    assert_eq!(ack.kind, PacketKind::Ack);
    assert_eq!(ack, Packet::ack(publish.id));
    assert_eq!(peer.recv().await, None);
}
