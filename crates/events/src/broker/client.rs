//! The process-lifetime broker client.
//!
//! [`BrokerClient`] is created once at startup and shared by reference
//! (`Arc<BrokerClient>`) with everything that declares queues or publishes.
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!       ▲                         │                  │
//!       └─────────── err ─────────┘   channel lost ──┘──▶ Connecting
//!
//! any state ──teardown()──▶ Closed (terminal)
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{AmqpConnector, BrokerChannel, BrokerConnector};
use crate::error::BrokerError;
use crate::reconnect::{next_delay, ReconnectConfig};

/// Lifecycle state of a [`BrokerClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct ClientInner {
    state: ConnectionState,
    channel: Option<Arc<dyn BrokerChannel>>,
}

/// Owns the single broker connection/channel of the process.
pub struct BrokerClient {
    connector: Box<dyn BrokerConnector>,
    inner: Mutex<ClientInner>,
    reconnect: ReconnectConfig,
    /// Cancelled by [`teardown`](Self::teardown); stops reconnect loops.
    shutdown: CancellationToken,
}

impl BrokerClient {
    /// Create a disconnected client. Call [`connect`](Self::connect) next.
    pub fn new(connector: impl BrokerConnector + 'static, reconnect: ReconnectConfig) -> Self {
        Self {
            connector: Box::new(connector),
            inner: Mutex::new(ClientInner {
                state: ConnectionState::Disconnected,
                channel: None,
            }),
            reconnect,
            shutdown: CancellationToken::new(),
        }
    }

    /// Client for an AMQP broker at `url`.
    pub fn amqp(url: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        Self::new(AmqpConnector::new(url), reconnect)
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Check the channel and return the resulting state. A channel that died
    /// since the last operation moves the client from `Connected` to
    /// `Connecting`.
    pub async fn health_check(&self) -> ConnectionState {
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Connected
            && !inner.channel.as_ref().is_some_and(|c| c.is_open())
        {
            tracing::warn!("Broker channel lost");
            inner.state = ConnectionState::Connecting;
            inner.channel = None;
        }
        inner.state
    }

    /// Establish the connection and channel.
    ///
    /// A no-op when already connected with an open channel. Failure leaves
    /// the client `Disconnected`; retrying is the caller's decision.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ConnectionState::Closed => return Err(BrokerError::Closed),
                ConnectionState::Connected
                    if inner.channel.as_ref().is_some_and(|c| c.is_open()) =>
                {
                    return Ok(());
                }
                _ => {}
            }
            inner.state = ConnectionState::Connecting;
            inner.channel = None;
        }

        // The lock is released while the handshake is in flight.
        let result = self.connector.connect().await;

        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Closed {
            // Torn down mid-handshake: discard the fresh channel.
            if let Ok(channel) = result {
                if let Err(e) = channel.close().await {
                    tracing::warn!(
                        broker = %self.connector.describe(),
                        error = %e,
                        "Failed to close channel opened during teardown",
                    );
                }
            }
            return Err(BrokerError::Closed);
        }

        match result {
            Ok(channel) => {
                inner.channel = Some(Arc::from(channel));
                inner.state = ConnectionState::Connected;
                tracing::info!(broker = %self.connector.describe(), "Connected to broker");
                Ok(())
            }
            Err(e) => {
                inner.state = ConnectionState::Disconnected;
                tracing::warn!(
                    broker = %self.connector.describe(),
                    error = %e,
                    "Broker connection failed",
                );
                Err(e)
            }
        }
    }

    /// Reconnect with exponential backoff.
    ///
    /// Returns `Ok` once connected, [`BrokerError::Closed`] if the client is
    /// torn down meanwhile, or the last connection error once
    /// `max_attempts` is exhausted.
    pub async fn reconnect(&self) -> Result<(), BrokerError> {
        let mut delay = self.reconnect.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tracing::info!(
                broker = %self.connector.describe(),
                attempt,
                "Reconnecting to broker",
            );

            let last_error = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(BrokerError::Closed),
                result = self.connect() => match result {
                    Ok(()) => {
                        tracing::info!(attempt, "Reconnected to broker");
                        return Ok(());
                    }
                    Err(BrokerError::Closed) => return Err(BrokerError::Closed),
                    Err(e) => e,
                },
            };

            if self
                .reconnect
                .max_attempts
                .is_some_and(|max| attempt >= max)
            {
                tracing::error!(attempt, error = %last_error, "Giving up on broker reconnect");
                return Err(last_error);
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(BrokerError::Closed),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, &self.reconnect);
        }
    }

    /// Idempotently declare the durable queue `name`.
    pub async fn setup_queue(&self, name: &str) -> Result<(), BrokerError> {
        let channel = self
            .open_channel(|| BrokerError::Topology {
                queue: name.to_string(),
                reason: "channel is not open".into(),
            })
            .await?;

        if let Err(e) = channel.declare_queue(name).await {
            if !channel.is_open() {
                self.mark_lost().await;
            }
            return Err(match e {
                BrokerError::Topology { .. } => e,
                other => BrokerError::Topology {
                    queue: name.to_string(),
                    reason: other.to_string(),
                },
            });
        }

        tracing::debug!(queue = %name, "Queue declared");
        Ok(())
    }

    /// Serialize `payload` as JSON and send it to `queue` as a persistent
    /// message.
    ///
    /// Fails with [`BrokerError::Publish`] if there is no open channel; the
    /// message is never silently discarded by the client.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
    ) -> Result<(), BrokerError> {
        let body = serde_json::to_vec(payload)?;
        let channel = self
            .open_channel(|| BrokerError::Publish(format!("channel is not open for {queue}")))
            .await?;

        let size = body.len();
        if let Err(e) = channel.send(queue, body).await {
            if !channel.is_open() {
                self.mark_lost().await;
            }
            return Err(match e {
                BrokerError::Publish(_) => e,
                other => BrokerError::Publish(other.to_string()),
            });
        }

        tracing::debug!(queue = %queue, bytes = size, "Message published");
        Ok(())
    }

    /// Close channel and connection. Idempotent; the client ends `Closed`.
    pub async fn teardown(&self) -> Result<(), BrokerError> {
        self.shutdown.cancel();

        let channel = {
            let mut inner = self.inner.lock().await;
            if inner.state == ConnectionState::Closed {
                return Ok(());
            }
            inner.state = ConnectionState::Closed;
            inner.channel.take()
        };

        if let Some(channel) = channel {
            channel.close().await?;
        }
        tracing::info!(broker = %self.connector.describe(), "Broker client closed");
        Ok(())
    }

    // ---- private helpers ----

    /// The current channel if it is open. A dead channel moves the client
    /// from `Connected` to `Connecting`.
    async fn open_channel(
        &self,
        not_open: impl FnOnce() -> BrokerError,
    ) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Closed {
            return Err(BrokerError::Closed);
        }
        match inner.channel.as_ref() {
            Some(channel) if channel.is_open() => Ok(Arc::clone(channel)),
            _ => {
                if inner.state == ConnectionState::Connected {
                    tracing::warn!("Broker channel lost");
                    inner.state = ConnectionState::Connecting;
                    inner.channel = None;
                }
                Err(not_open())
            }
        }
    }

    async fn mark_lost(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Connected {
            tracing::warn!("Broker channel lost");
            inner.state = ConnectionState::Connecting;
            inner.channel = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::broker::InMemoryBroker;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    fn client(broker: &InMemoryBroker) -> BrokerClient {
        BrokerClient::new(
            broker.clone(),
            ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                multiplier: 2.0,
                max_attempts: Some(5),
            },
        )
    }

    #[tokio::test]
    async fn starts_disconnected_and_connects() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        assert_eq!(client.state().await, ConnectionState::Disconnected);

        client.connect().await.unwrap();
        assert_eq!(client.state().await, ConnectionState::Connected);

        // Connecting again reuses the open channel.
        client.connect().await.unwrap();
        assert_eq!(broker.connections(), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_a_connection_error() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(1);
        let client = client(&broker);

        assert_matches!(client.connect().await, Err(BrokerError::Connection(_)));
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn setup_queue_is_idempotent() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();

        client.setup_queue("new_stories").await.unwrap();
        client.setup_queue("new_stories").await.unwrap();

        assert_eq!(broker.queue_names(), vec!["new_stories".to_string()]);
    }

    #[tokio::test]
    async fn publish_serializes_json() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();
        client.setup_queue("delete_story").await.unwrap();

        client
            .publish("delete_story", &serde_json::json!({ "guid": "abc" }))
            .await
            .unwrap();

        let messages: Vec<serde_json::Value> = broker.decoded("delete_story").unwrap();
        assert_eq!(messages, vec![serde_json::json!({ "guid": "abc" })]);
    }

    #[tokio::test]
    async fn publish_without_connection_fails_loudly() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);

        assert_matches!(
            client.publish("new_stories", &"x").await,
            Err(BrokerError::Publish(_))
        );
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn lost_channel_moves_to_connecting_and_publish_fails() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();
        client.setup_queue("new_stories").await.unwrap();

        broker.sever();

        assert_matches!(
            client.publish("new_stories", &"x").await,
            Err(BrokerError::Publish(_))
        );
        assert_eq!(client.state().await, ConnectionState::Connecting);
        assert_eq!(broker.message_count("new_stories"), 0);
    }

    #[tokio::test]
    async fn health_check_notices_a_dead_channel() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();
        assert_eq!(client.health_check().await, ConnectionState::Connected);

        broker.sever();

        assert_eq!(client.health_check().await, ConnectionState::Connecting);
    }

    /// Connector whose handshake completes only when `gate` is notified and
    /// whose channels fail to close.
    struct GatedConnector {
        gate: Arc<tokio::sync::Notify>,
        closes: Arc<AtomicUsize>,
    }

    struct UnclosableChannel {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrokerConnector for GatedConnector {
        async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
            self.gate.notified().await;
            Ok(Box::new(UnclosableChannel {
                closes: Arc::clone(&self.closes),
            }))
        }

        fn describe(&self) -> String {
            "gated".to_string()
        }
    }

    #[async_trait]
    impl BrokerChannel for UnclosableChannel {
        async fn declare_queue(&self, _name: &str) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn send(&self, _queue: &str, _body: Vec<u8>) -> Result<(), BrokerError> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }

        async fn close(&self) -> Result<(), BrokerError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(BrokerError::Connection("close frame rejected".into()))
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn teardown_during_handshake_closes_and_warns() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let gate = Arc::new(tokio::sync::Notify::new());
        let closes = Arc::new(AtomicUsize::new(0));
        let client = BrokerClient::new(
            GatedConnector {
                gate: Arc::clone(&gate),
                closes: Arc::clone(&closes),
            },
            ReconnectConfig::default(),
        );

        let connecting = client.connect();
        tokio::pin!(connecting);
        // Drive the connect until it parks on the handshake.
        assert!(futures::poll!(connecting.as_mut()).is_pending());
        assert_eq!(client.state().await, ConnectionState::Connecting);

        client.teardown().await.unwrap();
        gate.notify_one();

        assert_matches!(connecting.await, Err(BrokerError::Closed));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(client.state().await, ConnectionState::Closed);
        let output = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
        let warned = output.lines().any(|line| {
            line.contains("WARN") && line.contains("Failed to close channel opened during teardown")
        });
        assert!(warned, "{output}");
    }

    #[tokio::test]
    async fn reconnect_retries_until_connected() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        broker.fail_next_connects(2);

        client.reconnect().await.unwrap();

        assert_eq!(client.state().await, ConnectionState::Connected);
        assert_eq!(broker.connections(), 1);
    }

    #[tokio::test]
    async fn reconnect_gives_up_after_max_attempts() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        broker.fail_next_connects(10);

        assert_matches!(client.reconnect().await, Err(BrokerError::Connection(_)));
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn teardown_is_terminal_and_idempotent() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);
        client.connect().await.unwrap();

        client.teardown().await.unwrap();
        client.teardown().await.unwrap();

        assert_eq!(client.state().await, ConnectionState::Closed);
        assert_matches!(client.connect().await, Err(BrokerError::Closed));
        assert_matches!(client.publish("q", &1).await, Err(BrokerError::Closed));
        assert_matches!(client.setup_queue("q").await, Err(BrokerError::Closed));
        assert_matches!(client.reconnect().await, Err(BrokerError::Closed));
    }
}
