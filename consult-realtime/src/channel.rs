//! The shared realtime channel and its reconnect loop.
//!
//! One [`RealtimeChannel`] owns one physical connection at a time and keeps
//! it alive for the life of the process: when the link drops, the driver
//! task backs off and reconnects. Subscriptions live in the channel's
//! [`TopicRegistry`], so they carry over to the new link untouched.
//!
//! ## State machine
//!
//! ```text
//! Uninitialized -> Connecting -> Connected -> Disconnected -> Connecting -> ...
//! ```
//!
//! There is no terminal state reachable from the outside.

use futures_util::{SinkExt, StreamExt};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectConfig;
use crate::connector::{Connector, Link, WsConnector};
use crate::envelope::Envelope;
use crate::error::ChannelError;
use crate::subscription::{Handler, Subscription, TopicRegistry};

static CHANNEL: OnceCell<Arc<RealtimeChannel>> = OnceCell::new();

/// Connection state of the physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Pieces handed to the driver task when the channel starts.
struct Pending {
    connector: Box<dyn Connector>,
    outbound: mpsc::UnboundedReceiver<Envelope>,
}

/// Shared realtime connection multiplexing topic subscriptions.
pub struct RealtimeChannel {
    endpoint: String,
    registry: Arc<TopicRegistry>,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::UnboundedSender<Envelope>,
    reconnect: ReconnectConfig,
    pending: Mutex<Option<Pending>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Return the process-wide channel, creating and starting it on first use.
///
/// Only the first endpoint is honoured; later calls get the existing channel
/// whatever URL they pass. Must be called from within a tokio runtime.
pub fn get_channel(endpoint: &str) -> Arc<RealtimeChannel> {
    get_channel_with(endpoint, ReconnectConfig::default(), None)
}

/// [`get_channel`] with explicit reconnect policy and credentials, both only
/// used on first creation.
pub fn get_channel_with(
    endpoint: &str,
    reconnect: ReconnectConfig,
    bearer_token: Option<String>,
) -> Arc<RealtimeChannel> {
    let channel = CHANNEL.get_or_init(|| {
        let connector = WsConnector::new(endpoint).with_bearer_token(bearer_token);
        let channel = Arc::new(RealtimeChannel::new(connector, reconnect));
        channel.start();
        channel
    });
    if channel.endpoint() != endpoint {
        debug!(
            requested = endpoint,
            active = channel.endpoint(),
            "Realtime channel already initialised; ignoring endpoint"
        );
    }
    Arc::clone(channel)
}

impl RealtimeChannel {
    /// Build a channel that has not connected yet. Call [`start`](Self::start)
    /// to spawn its driver.
    pub fn new(connector: impl Connector, reconnect: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Uninitialized);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Self {
            endpoint: connector.endpoint().to_string(),
            registry: Arc::new(TopicRegistry::new()),
            state,
            outbound,
            reconnect,
            pending: Mutex::new(Some(Pending {
                connector: Box::new(connector),
                outbound: outbound_rx,
            })),
            driver: Mutex::new(None),
        }
    }

    /// Spawn the connection driver. Later calls are no-ops.
    pub fn start(&self) {
        let Some(pending) = self.pending.lock().take() else {
            return;
        };
        self.state.send_replace(ConnectionState::Connecting);
        let driver = tokio::spawn(drive(
            pending.connector,
            Arc::clone(&self.registry),
            self.state.clone(),
            pending.outbound,
            self.reconnect.clone(),
        ));
        *self.driver.lock() = Some(driver);
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Attach `handler` to `topic`. The returned guard detaches it again.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_handler(topic, Arc::new(handler))
    }

    pub fn subscribe_handler(&self, topic: &str, handler: Handler) -> Subscription {
        let id = self.registry.attach(topic, handler);
        debug!(topic, handler_id = %id, "Subscribed");
        Subscription::new(topic, id, &self.registry)
    }

    /// Send an event to the server. Dropped (returns false) unless connected.
    pub fn emit(&self, topic: &str, payload: Value) -> bool {
        if !self.is_connected() {
            debug!(topic, "Not connected; dropping outbound event");
            return false;
        }
        self.outbound.send(Envelope::new(topic, payload)).is_ok()
    }

    /// Number of live handlers attached to `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.registry.listener_count(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.registry.topics()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
    }
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("topics", &self.registry.topics())
            .finish()
    }
}

/// Why a link stopped pumping.
enum LinkEnd {
    Lost(ChannelError),
    Shutdown,
}

async fn drive(
    connector: Box<dyn Connector>,
    registry: Arc<TopicRegistry>,
    state: watch::Sender<ConnectionState>,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    reconnect: ReconnectConfig,
) {
    let mut backoff = reconnect.initial_ms;
    loop {
        state.send_replace(ConnectionState::Connecting);
        match connector.connect().await {
            Ok(link) => {
                info!(endpoint = connector.endpoint(), "Realtime connection established");
                state.send_replace(ConnectionState::Connected);
                backoff = reconnect.initial_ms;

                match pump(link, &registry, &mut outbound).await {
                    LinkEnd::Lost(err) => {
                        warn!(endpoint = connector.endpoint(), error = %err, "Realtime connection lost");
                        state.send_replace(ConnectionState::Disconnected);
                    }
                    LinkEnd::Shutdown => {
                        state.send_replace(ConnectionState::Disconnected);
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(endpoint = connector.endpoint(), error = %err, "Realtime connection failed");
                state.send_replace(ConnectionState::Disconnected);
            }
        }

        let delay = reconnect.delay(backoff);
        debug!(delay_ms = delay.as_millis() as u64, "Reconnecting");
        tokio::time::sleep(delay).await;
        backoff = reconnect.next_backoff(backoff);
    }
}

async fn pump(
    link: Link,
    registry: &TopicRegistry,
    outbound: &mut mpsc::UnboundedReceiver<Envelope>,
) -> LinkEnd {
    let Link {
        mut inbound,
        outbound: mut sink,
    } = link;

    loop {
        tokio::select! {
            message = inbound.next() => match message {
                Some(Ok(envelope)) => {
                    let delivered = registry.dispatch(&envelope);
                    debug!(topic = %envelope.topic, delivered, "Realtime event");
                }
                Some(Err(ChannelError::Decode(reason))) => {
                    warn!(reason = %reason, "Skipping undecodable realtime frame");
                }
                Some(Err(err)) => return LinkEnd::Lost(err),
                None => return LinkEnd::Lost(ChannelError::Closed),
            },
            message = outbound.recv() => match message {
                Some(envelope) => {
                    if let Err(err) = sink.send(envelope).await {
                        return LinkEnd::Lost(err);
                    }
                }
                None => return LinkEnd::Shutdown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use serde_json::json;
    use std::time::Duration;

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_ms: 10,
            max_ms: 40,
            multiplier: 2.0,
            jitter_ms: 0,
        }
    }

    async fn wait_for_state(channel: &RealtimeChannel, expected: ConnectionState) {
        let mut changes = channel.state_changes();
        tokio::time::timeout(
            Duration::from_secs(5),
            changes.wait_for(|state| *state == expected),
        )
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_new_channel_is_uninitialized() {
        let channel = RealtimeChannel::new(MemoryConnector::new(), fast_reconnect());
        assert_eq!(channel.state(), ConnectionState::Uninitialized);
        assert!(!channel.is_connected());
        assert!(!channel.emit("booking_update", json!({})));
    }

    #[tokio::test]
    async fn test_start_connects_once() {
        let connector = MemoryConnector::new();
        let channel = RealtimeChannel::new(connector.clone(), fast_reconnect());
        channel.start();
        channel.start();
        wait_for_state(&channel, ConnectionState::Connected).await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(channel.endpoint(), "memory://local");
    }

    #[tokio::test]
    async fn test_refused_connection_keeps_retrying() {
        let connector = MemoryConnector::new();
        connector.set_refuse(true);
        let channel = RealtimeChannel::new(connector.clone(), fast_reconnect());
        channel.start();
        wait_for_state(&channel, ConnectionState::Disconnected).await;
        assert!(!channel.is_connected());

        connector.set_refuse(false);
        wait_for_state(&channel, ConnectionState::Connected).await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_reaches_the_link() {
        let connector = MemoryConnector::new();
        let channel = RealtimeChannel::new(connector.clone(), fast_reconnect());
        channel.start();
        wait_for_state(&channel, ConnectionState::Connected).await;

        assert!(channel.emit("join_room", json!({"room": "faculty-12"})));
        tokio::time::timeout(Duration::from_secs(5), async {
            while connector.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(
            connector.sent(),
            vec![Envelope::new("join_room", json!({"room": "faculty-12"}))]
        );
    }
}
