//! Transport trait abstraction for pluggable realtime backends

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Inbound text frames; the stream ending is the transport's closure signal
pub type FrameReceiver = mpsc::UnboundedReceiver<String>;

/// The sending half of a live duplex session
pub trait Transport: Send + Sync {
    /// Queue a text frame for transmission without waiting for it to be written
    fn send_text(&self, text: String) -> Result<()>;

    /// Request the session to close gracefully
    fn close(&self);
}

/// An established session: the sending half plus the inbound frame stream
pub struct TransportSession {
    pub transport: Arc<dyn Transport>,
    pub frames: FrameReceiver,
}

/// Factory for creating transport sessions
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Attempt to connect, returning a session once the transport confirms it is open
    async fn connect(&self, url: &Url) -> Result<TransportSession>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
