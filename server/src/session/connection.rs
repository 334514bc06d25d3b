//! Individual chat session handling

use crate::handler;
use crate::session::SessionManager;
use crate::DevServerError;
use chathub_protocol::{codec, realtime, Envelope};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Path the realtime endpoint is served on
pub const CHAT_PATH: &str = "/ws/chat";

/// Handle to send envelopes to a specific user's session
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub user_id: String,
    /// Distinguishes a user's successive sessions
    pub connection_id: Uuid,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    tx: mpsc::UnboundedSender<Message>,
}

impl SessionHandle {
    pub fn new(user_id: String, addr: SocketAddr, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            user_id,
            connection_id: Uuid::new_v4(),
            addr,
            connected_at: Instant::now(),
            tx,
        }
    }

    /// Queue an envelope for this session's writer
    pub fn send(&self, envelope: &Envelope) -> Result<(), DevServerError> {
        let text = codec::encode(envelope)?;
        self.tx
            .send(Message::text(text))
            .map_err(|_| DevServerError::SessionClosed(self.user_id.clone()))
    }

    /// Ask the writer to close the socket
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }
}

/// Extract the bearer token from a handshake query string
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == realtime::TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Accept the upgrade, then route frames until the peer goes away
pub async fn run_session(
    stream: TcpStream,
    addr: SocketAddr,
    sessions: Arc<SessionManager>,
) -> Result<(), DevServerError> {
    let mut user_id = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() != CHAT_PATH {
            return Err(reject(StatusCode::NOT_FOUND, "unknown endpoint"));
        }
        match token_from_query(req.uri().query()) {
            Some(token) => {
                user_id = Some(token);
                Ok(resp)
            }
            None => Err(reject(StatusCode::UNAUTHORIZED, "missing token")),
        }
    })
    .await?;

    let user_id = user_id.ok_or(DevServerError::Unauthorized)?;
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let handle = SessionHandle::new(user_id, addr, tx);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = msg.is_close();
            if write.send(msg).await.is_err() || closing {
                break;
            }
        }
        let _ = write.close().await;
    });

    sessions.register(handle.clone()).await;
    if let Err(e) = handle.send(&Envelope::connection_established(handle.user_id.as_str())) {
        warn!("Failed to greet {}: {}", handle.user_id, e);
    }
    info!("Session open: {} from {}", handle.user_id, addr);

    while let Some(result) = read.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handler::handle_frame(&sessions, &handle, text.as_str()).await;
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => handler::handle_frame(&sessions, &handle, text).await,
                Err(_) => warn!("Dropping non-UTF-8 binary frame from {}", handle.user_id),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error from {}: {}", handle.user_id, e);
                break;
            }
        }
    }

    sessions.unregister(&handle).await;
    handle.close();
    let _ = writer.await;
    info!("Session closed: {} ({})", handle.user_id, handle.connection_id);

    Ok(())
}
