//! Broker-backed events and acknowledged fan-out between hosts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use microhost::pubsub::{Broker, MemoryBroker};
use microhost::registry::{Registry, StaticRegistry};
use microhost::{Host, HostContext, Subscriber};

mod common;

fn recording_subscriber(service: &str, sink: mpsc::UnboundedSender<Value>) -> Subscriber {
    Subscriber::builder(service, "1")
        .on("onEvent", move |_key, payload| {
            let sink = sink.clone();
            async move {
                let _ = sink.send(payload);
                Ok(())
            }
        })
        .build()
}

#[tokio::test]
async fn broker_event_reaches_subscriber_exactly_once() {
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let registry: Arc<dyn Registry> = Arc::new(StaticRegistry::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber_context = Arc::new(HostContext::with_parts(
        common::local_config("listener"),
        Arc::clone(&registry),
        Arc::clone(&broker),
    ));
    let host = common::start_host(Host::with_context(subscriber_context).subscriber(recording_subscriber("x", tx))).await;

    let publisher_context = HostContext::with_parts(common::local_config("x"), registry, broker);
    assert_eq!(publisher_context.publisher().channel("onEvent"), "x/1/onEvent");
    assert!(publisher_context.publisher().publish("onEvent", &json!({"n": 1})).await);

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(received, Some(json!({"n": 1})));
    assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err());

    host.stop().await;
}

#[tokio::test]
async fn events_on_other_channels_are_not_delivered() {
    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
    let registry: Arc<dyn Registry> = Arc::new(StaticRegistry::new());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let context = Arc::new(HostContext::with_parts(
        common::local_config("listener"),
        Arc::clone(&registry),
        Arc::clone(&broker),
    ));
    let host = common::start_host(Host::with_context(context).subscriber(recording_subscriber("x", tx))).await;

    let other = HostContext::with_parts(common::local_config("y"), registry, broker);
    other.publisher().publish("onEvent", &json!({"n": 2})).await;

    assert!(tokio::time::timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    host.stop().await;
}

#[tokio::test]
async fn fanout_publish_is_acknowledged_by_each_subscriber_node() {
    let registry = common::start_fake_registry().await;

    let delivered = Arc::new(AtomicUsize::new(0));
    let mut hosts = Vec::new();
    for _ in 0..2 {
        let mut config = common::local_config("listener");
        common::use_registry(&mut config, registry.addr);
        let count = Arc::clone(&delivered);
        let subscriber = Subscriber::builder("x", "1")
            .on("onEvent", move |_key, _payload| {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .build();
        hosts.push(common::start_host(Host::new(config).subscriber(subscriber)).await);
    }

    let subscribers = registry.store.get_subscribers("x", "1", "onEvent").await.unwrap();
    assert_eq!(subscribers.len(), 2);

    let mut config = common::local_config("x");
    common::use_registry(&mut config, registry.addr);
    let publisher = HostContext::new(config);

    let sent = publisher.fanout().publish("onEvent", json!({"n": 1})).await.unwrap();
    assert_eq!(sent.len(), 2);
    assert!(common::eventually(|| publisher.fanout().pending_count() == 0).await);
    assert_eq!(delivered.load(Ordering::SeqCst), 2);

    for host in hosts {
        host.stop().await;
    }
}

#[tokio::test]
async fn failed_handler_leaves_fanout_publish_pending() {
    let registry = common::start_fake_registry().await;

    let mut config = common::local_config("listener");
    common::use_registry(&mut config, registry.addr);
    let subscriber = Subscriber::builder("x", "1")
        .on("onEvent", |_key, _payload| async { Err::<(), microhost::BoxError>("rejected".into()) })
        .build();
    let host = common::start_host(Host::new(config).subscriber(subscriber)).await;

    let mut config = common::local_config("x");
    common::use_registry(&mut config, registry.addr);
    let publisher = HostContext::new(config);

    let sent = publisher.fanout().publish("onEvent", json!(null)).await.unwrap();
    assert_eq!(sent.len(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(publisher.fanout().pending_count(), 1);
    assert!(publisher.fanout().pending().contains(&sent[0]));

    host.stop().await;
}
