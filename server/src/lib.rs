//! Minimal ChatHub realtime server for local development and integration tests
//!
//! Authenticates the upgrade by its `token` query parameter (the token is taken
//! as the user id), keeps one session per user and routes chat, typing and
//! read-receipt envelopes between online users. Nothing is persisted.

pub mod handler;
pub mod session;

use chathub_protocol::codec::CodecError;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use session::{SessionHandle, SessionManager, CHAT_PATH};

#[derive(Error, Debug)]
pub enum DevServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Handshake accepted without a credential")]
    Unauthorized,

    #[error("User not connected: {0}")]
    UserOffline(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),
}

/// Accept connections on `listener` until it fails
pub async fn serve(listener: TcpListener, sessions: Arc<SessionManager>) -> Result<(), DevServerError> {
    info!("Chat server listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = listener.accept().await?;
        let sessions = sessions.clone();

        tokio::spawn(async move {
            if let Err(e) = session::run_session(stream, addr, sessions).await {
                error!("Connection from {} failed: {}", addr, e);
            }
        });
    }
}
