//! Redis broker over RESP2.
//!
//! # Responsibilities
//! - `PUBLISH` on a dedicated connection, reconnecting once on failure
//! - `SUBSCRIBE` on a second connection owned by a background task
//! - Re-establish and re-subscribe after any disconnect, with backoff

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;

use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::pubsub::broker::{Broker, BrokerMessage, SUBSCRIPTION_BUFFER};
use crate::pubsub::resp::{Command, RespCodec, RespValue};
use crate::resilience::Backoff;

type RespStream = Framed<TcpStream, RespCodec>;

/// Broker backed by a Redis server.
pub struct RedisBroker {
    addr: String,
    connect_timeout: Duration,
    reconnect_base_ms: u64,
    reconnect_max_ms: u64,
    publisher: Mutex<Option<RespStream>>,
}

impl RedisBroker {
    pub fn new(config: &BrokerConfig, connect_timeout: Duration) -> Self {
        Self {
            addr: config.address(),
            connect_timeout,
            reconnect_base_ms: config.reconnect_base_ms,
            reconnect_max_ms: config.reconnect_max_ms,
            publisher: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    async fn publish_once(stream: &mut RespStream, channel: &str, payload: &str) -> Result<i64, BrokerError> {
        stream.send(Command::new(["PUBLISH", channel, payload])).await?;
        match stream.next().await {
            Some(Ok(RespValue::Integer(receivers))) => Ok(receivers),
            Some(Ok(RespValue::Error(message))) => Err(BrokerError::Protocol(message)),
            Some(Ok(other)) => Err(BrokerError::Protocol(format!("unexpected PUBLISH reply {other:?}"))),
            Some(Err(e)) => Err(e),
            None => Err(BrokerError::Closed),
        }
    }
}

async fn open(addr: &str, timeout: Duration) -> Result<RespStream, BrokerError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| BrokerError::Connect {
            addr: addr.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| BrokerError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    let _ = stream.set_nodelay(true);
    Ok(Framed::new(stream, RespCodec))
}

async fn open_subscription(addr: &str, timeout: Duration, channels: &[String]) -> Result<RespStream, BrokerError> {
    let mut stream = open(addr, timeout).await?;
    let mut command = vec!["SUBSCRIBE".to_string()];
    command.extend(channels.iter().cloned());
    stream.send(Command::new(command)).await?;
    Ok(stream)
}

/// Split a pushed `message` frame into its channel and payload.
fn as_message(value: RespValue) -> Option<BrokerMessage> {
    let RespValue::Array(Some(items)) = value else {
        return None;
    };
    match items.as_slice() {
        [kind, channel, payload] if kind.as_text().as_deref() == Some("message") => Some(BrokerMessage {
            channel: channel.as_text()?,
            payload: payload.as_text()?,
        }),
        _ => None,
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let stream = open(&self.addr, self.connect_timeout).await?;
        *self.publisher.lock().await = Some(stream);
        tracing::info!(address = %self.addr, "Connected to broker");
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BrokerError> {
        let mut slot = self.publisher.lock().await;

        if let Some(stream) = slot.as_mut() {
            match Self::publish_once(stream, channel, payload).await {
                Ok(_) => return Ok(()),
                Err(BrokerError::Protocol(message)) => return Err(BrokerError::Protocol(message)),
                Err(e) => {
                    tracing::warn!(address = %self.addr, error = %e, "Broker connection lost, reconnecting");
                }
            }
        }

        // One fresh connection per failed publish; the next publish tries again.
        *slot = None;
        let mut stream = open(&self.addr, self.connect_timeout).await?;
        Self::publish_once(&mut stream, channel, payload).await?;
        *slot = Some(stream);
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        let channels = channels.to_vec();
        let mut stream = open_subscription(&self.addr, self.connect_timeout, &channels).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let addr = self.addr.clone();
        let timeout = self.connect_timeout;
        let mut backoff = Backoff::new(self.reconnect_base_ms, self.reconnect_max_ms);

        tokio::spawn(async move {
            'session: loop {
                loop {
                    let frame = tokio::select! {
                        _ = tx.closed() => break 'session,
                        frame = stream.next() => frame,
                    };
                    match frame {
                        Some(Ok(value)) => {
                            backoff.reset();
                            if let Some(message) = as_message(value) {
                                if tx.send(message).await.is_err() {
                                    break 'session;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(address = %addr, error = %e, "Subscription stream failed");
                            break;
                        }
                        None => {
                            tracing::warn!(address = %addr, "Broker closed subscription stream");
                            break;
                        }
                    }
                }

                loop {
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = tx.closed() => break 'session,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    match open_subscription(&addr, timeout, &channels).await {
                        Ok(fresh) => {
                            tracing::info!(address = %addr, attempts = backoff.attempts(), "Resubscribed to broker");
                            stream = fresh;
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(address = %addr, error = %e, "Broker reconnect failed");
                        }
                    }
                }
            }
            tracing::debug!(address = %addr, "Subscription loop ended");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config_for(port: u16) -> BrokerConfig {
        BrokerConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port,
            reconnect_base_ms: 10,
            reconnect_max_ms: 50,
        }
    }

    #[test]
    fn message_frames_are_recognised() {
        let frame = RespValue::Array(Some(vec![
            RespValue::Bulk(Some(b"message".to_vec())),
            RespValue::Bulk(Some(b"x/1/onEvent".to_vec())),
            RespValue::Bulk(Some(b"{}".to_vec())),
        ]));
        assert_eq!(
            as_message(frame),
            Some(BrokerMessage {
                channel: "x/1/onEvent".into(),
                payload: "{}".into()
            })
        );

        let confirmation = RespValue::Array(Some(vec![
            RespValue::Bulk(Some(b"subscribe".to_vec())),
            RespValue::Bulk(Some(b"x/1/onEvent".to_vec())),
            RespValue::Integer(1),
        ]));
        assert_eq!(as_message(confirmation), None);
    }

    #[tokio::test]
    async fn publish_reconnects_after_server_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            // First connection is dropped without a reply.
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            let (mut second, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let _ = second.read(&mut buf).await.unwrap();
            second.write_all(b":1\r\n").await.unwrap();
        });

        let broker = RedisBroker::new(&config_for(port), Duration::from_secs(1));
        broker.connect().await.unwrap();
        broker.publish("x/1/onEvent", "{\"n\":1}").await.unwrap();
    }

    async fn read_subscribe(stream: &mut tokio::net::TcpStream) -> String {
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        while !String::from_utf8_lossy(&received).contains("x/1/onEvent") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed before subscribing");
            received.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(received).unwrap()
    }

    #[tokio::test]
    async fn subscription_resubscribes_after_server_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let command = read_subscribe(&mut first).await;
            drop(first);

            let (mut second, _) = listener.accept().await.unwrap();
            let resubscribe = read_subscribe(&mut second).await;
            second
                .write_all(b"*3\r\n$9\r\nsubscribe\r\n$11\r\nx/1/onEvent\r\n:1\r\n")
                .await
                .unwrap();
            second
                .write_all(b"*3\r\n$7\r\nmessage\r\n$11\r\nx/1/onEvent\r\n$7\r\n{\"n\":1}\r\n")
                .await
                .unwrap();
            (command, resubscribe, second)
        });

        let broker = RedisBroker::new(&config_for(port), Duration::from_secs(1));
        let mut rx = broker.subscribe(&["x/1/onEvent".to_string()]).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no message after resubscribing")
            .unwrap();
        assert_eq!(
            message,
            BrokerMessage {
                channel: "x/1/onEvent".into(),
                payload: "{\"n\":1}".into()
            }
        );

        let (command, resubscribe, _second) = server.await.unwrap();
        assert!(command.contains("SUBSCRIBE"));
        assert_eq!(command, resubscribe);
    }

    #[tokio::test]
    async fn unreachable_broker_fails_connect() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let broker = RedisBroker::new(&config_for(port), Duration::from_secs(1));
        assert!(matches!(broker.connect().await, Err(BrokerError::Connect { .. })));
    }
}
