//! Physical links: how the channel opens a connection to the event source.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{future, Sink, SinkExt, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;

use crate::envelope::Envelope;
use crate::error::ChannelError;

/// Stream of decoded inbound envelopes. Ends when the peer goes away.
pub type InboundStream = BoxStream<'static, Result<Envelope, ChannelError>>;

/// Sink accepting outbound envelopes.
pub type OutboundSink = Pin<Box<dyn Sink<Envelope, Error = ChannelError> + Send>>;

/// One open connection, split into its two halves.
pub struct Link {
    pub inbound: InboundStream,
    pub outbound: OutboundSink,
}

/// Opens physical connections on behalf of a [`crate::RealtimeChannel`].
///
/// Called once per connection attempt; the channel owns the reconnect loop.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Link, ChannelError>;

    fn endpoint(&self) -> &str;
}

/// WebSocket connector carrying JSON text frames.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
    bearer_token: Option<String>,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, ChannelError> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        if let Some(token) = &self.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ChannelError::Connect(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (sink, stream) = stream.split();

        let inbound = stream
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Envelope::from_json(&text)),
                    Ok(Message::Close(_)) => Some(Err(ChannelError::Closed)),
                    Ok(_) => None,
                    Err(err) => Some(Err(ChannelError::from(err))),
                })
            })
            .boxed();

        let outbound = sink
            .sink_map_err(ChannelError::from)
            .with(|envelope: Envelope| future::ready(envelope.to_json().map(Message::Text)));

        Ok(Link {
            inbound,
            outbound: Box::pin(outbound),
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
