//! WebSocket transport implementation backed by tokio-tungstenite

use crate::transport::traits::{Transport, TransportConnector, TransportSession};
use anyhow::Result;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};
use url::Url;

/// Default time allowed for the TCP + WebSocket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time the peer gets to answer our close frame before the socket is dropped
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors raised while establishing or using a WebSocket session
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),

    #[error("Transport closed")]
    Closed,
}

enum Outgoing {
    Text(String),
    Close,
}

/// Sending half of a WebSocket session
pub struct WebSocketTransport {
    tx: mpsc::UnboundedSender<Outgoing>,
    closing: Arc<Notify>,
}

impl Transport for WebSocketTransport {
    fn send_text(&self, text: String) -> Result<()> {
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)?;
        Ok(())
    }

    fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
        self.closing.notify_one();
    }
}

/// WebSocket connector for the realtime endpoint
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// How long to wait for the peer's close reply after a local close
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<TransportSession> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))?
                .map_err(TransportError::Handshake)?;

        let (write, read) = ws_stream.split();

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let closing = Arc::new(Notify::new());

        tokio::spawn(writer_task(write, outgoing_rx));
        tokio::spawn(reader_task(
            read,
            incoming_tx,
            closing.clone(),
            self.close_timeout,
        ));

        Ok(TransportSession {
            transport: Arc::new(WebSocketTransport {
                tx: outgoing_tx,
                closing,
            }),
            frames: incoming_rx,
        })
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}

/// Forwards queued frames to the socket until a close is requested
async fn writer_task<S>(mut write: S, mut rx: mpsc::UnboundedReceiver<Outgoing>)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Text(text) => {
                if let Err(e) = write.send(Message::text(text)).await {
                    warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            Outgoing::Close => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = write.close().await;
}

/// Forwards text frames to the session until the socket closes.
///
/// Once a local close is requested (or nobody listens for frames anymore) the
/// peer has `close_timeout` to finish the close handshake; after that the read
/// half is dropped so the socket is released.
async fn reader_task<S>(
    mut read: S,
    tx: mpsc::UnboundedSender<String>,
    closing: Arc<Notify>,
    close_timeout: Duration,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut deadline: Option<Instant> = None;

    loop {
        let next = match deadline {
            None => tokio::select! {
                next = read.next() => next,
                _ = closing.notified() => {
                    deadline = Some(Instant::now() + close_timeout);
                    continue;
                }
                _ = tx.closed() => {
                    deadline = Some(Instant::now() + close_timeout);
                    continue;
                }
            },
            Some(at) => match timeout_at(at, read.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!("Peer did not finish the close handshake, dropping socket");
                    break;
                }
            },
        };

        let Some(result) = next else {
            break;
        };

        let text = match result {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non UTF-8 binary frame ({} bytes)", data.len());
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                debug!("WebSocket close frame received: {:?}", frame);
                break;
            }
            // Ping/pong are answered by tungstenite
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket read failed: {}", e);
                break;
            }
        };

        if deadline.is_none() && tx.send(text).is_err() {
            deadline = Some(Instant::now() + close_timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    /// Completes the handshake, then only reads raw bytes so no close frame is
    /// ever answered. Resolves once the client side releases the socket.
    async fn silent_peer() -> (Url, JoinHandle<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}/ws/chat", listener.local_addr().unwrap())).unwrap();

        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let socket = ws.get_mut();
            let mut buf = [0u8; 1024];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return true,
                    Ok(_) => {}
                }
            }
        });

        (url, peer)
    }

    fn short_close_connector() -> WebSocketConnector {
        WebSocketConnector::new(Duration::from_secs(2))
            .with_close_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_close_releases_socket_when_peer_never_answers() {
        let (url, peer) = silent_peer().await;
        let TransportSession {
            transport,
            mut frames,
        } = short_close_connector().connect(&url).await.unwrap();

        transport.close();

        let ended = timeout(Duration::from_secs(5), frames.recv()).await.unwrap();
        assert!(ended.is_none());
        let released = timeout(Duration::from_secs(5), peer).await.unwrap().unwrap();
        assert!(released);
    }

    #[tokio::test]
    async fn test_abandoned_session_releases_socket() {
        let (url, peer) = silent_peer().await;
        let session = short_close_connector().connect(&url).await.unwrap();

        // What a superseded session driver leaves behind
        drop(session);

        let released = timeout(Duration::from_secs(5), peer).await.unwrap().unwrap();
        assert!(released);
    }

    #[test]
    fn test_websocket_connector_name() {
        let connector = WebSocketConnector::default();
        assert_eq!(connector.name(), "WebSocket");
    }

    #[tokio::test]
    async fn test_connect_refused_is_an_error() {
        // Port 9 (discard) is not expected to host a WebSocket server
        let connector = WebSocketConnector::new(Duration::from_secs(2));
        let url = Url::parse("ws://127.0.0.1:9/ws/chat?token=abc").unwrap();
        assert!(connector.connect(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_send_after_writer_gone_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let transport = WebSocketTransport {
            tx,
            closing: Arc::new(Notify::new()),
        };
        assert!(transport.send_text("{}".into()).is_err());
        // close never panics
        transport.close();
    }
}
