//! Realtime event multiplexing for Consult.
//!
//! Many logical subscribers share one physical push connection. Callers get
//! the shared channel from [`get_channel`], attach handlers per topic with
//! [`RealtimeChannel::subscribe`], and detach them by dropping (or calling
//! `unsubscribe` on) the returned [`Subscription`].
//!
//! Invariants:
//!
//! - physical listeners per topic == live subscriptions per topic
//! - unsubscribing never removes a sibling handler
//! - reconnecting never attaches a handler twice
//!
//! Wire format is one JSON text frame per event: `{"topic": .., "payload": ..}`.

mod backoff;
mod channel;
mod connector;
mod envelope;
mod error;
mod memory;
mod subscription;

pub use backoff::ReconnectConfig;
pub use channel::{get_channel, get_channel_with, ConnectionState, RealtimeChannel};
pub use connector::{Connector, InboundStream, Link, OutboundSink, WsConnector};
pub use envelope::Envelope;
pub use error::{ChannelError, Result};
pub use memory::MemoryConnector;
pub use subscription::{Handler, HandlerId, Subscription, TopicRegistry};
