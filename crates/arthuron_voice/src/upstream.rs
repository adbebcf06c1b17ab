//! Seam between the relay worker and the remote synthesis service.

use arthuron_core::{InboundMessage, OutboundMessage, RelayError};
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

pub type UpstreamSink = Pin<Box<dyn Sink<OutboundMessage, Error = RelayError> + Send>>;
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<InboundMessage, RelayError>> + Send>>;

/// One live, already-initialized synthesis connection split into its two
/// directions. The stream ending means the remote side closed.
pub struct UpstreamSession {
    pub sink: UpstreamSink,
    pub stream: UpstreamStream,
}

impl UpstreamSession {
    pub fn new<S, T>(sink: S, stream: T) -> Self
    where
        S: Sink<OutboundMessage, Error = RelayError> + Send + 'static,
        T: Stream<Item = Result<InboundMessage, RelayError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Factory for upstream sessions.
///
/// `connect` must open the connection and complete the initialization
/// handshake with the same parameters on every call.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self) -> Result<UpstreamSession, RelayError>;

    /// Human-readable target for logs.
    fn describe(&self) -> String {
        "synthesis upstream".to_string()
    }
}
