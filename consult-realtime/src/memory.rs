//! In-process connector, for tests and for wiring the channel to a local
//! event source without a socket.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{sink, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::connector::{Connector, Link};
use crate::envelope::Envelope;
use crate::error::ChannelError;

#[derive(Default)]
struct MemoryShared {
    current: Mutex<Option<mpsc::UnboundedSender<Result<Envelope, ChannelError>>>>,
    sent: Mutex<Vec<Envelope>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

/// Connector whose "server" side is driven from the test.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<MemoryShared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event on the current link. False when no link is open.
    pub fn push(&self, topic: &str, payload: Value) -> bool {
        self.push_raw(Ok(Envelope::new(topic, payload)))
    }

    /// Deliver a raw inbound item, e.g. a decode failure.
    pub fn push_raw(&self, item: Result<Envelope, ChannelError>) -> bool {
        match self.shared.current.lock().as_ref() {
            Some(sender) => sender.unbounded_send(item).is_ok(),
            None => false,
        }
    }

    /// Close the current link as if the peer dropped it.
    pub fn disconnect(&self) {
        self.shared.current.lock().take();
    }

    /// Make subsequent connection attempts fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn is_linked(&self) -> bool {
        self.shared.current.lock().is_some()
    }

    /// Everything the channel emitted so far.
    pub fn sent(&self) -> Vec<Envelope> {
        self.shared.sent.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Link, ChannelError> {
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("connection refused".to_string()));
        }

        let (sender, receiver) = mpsc::unbounded();
        *self.shared.current.lock() = Some(sender);
        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        let outbound = sink::unfold(
            Arc::clone(&self.shared),
            |shared, envelope: Envelope| async move {
                shared.sent.lock().push(envelope);
                Ok::<_, ChannelError>(shared)
            },
        );

        Ok(Link {
            inbound: receiver.boxed(),
            outbound: Box::pin(outbound),
        })
    }

    fn endpoint(&self) -> &str {
        "memory://local"
    }
}
