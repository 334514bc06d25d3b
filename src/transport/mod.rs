//! Realtime transports
//!
//! The connection core only sees [`TransportConnector`] and [`Transport`];
//! the WebSocket backend is the production implementation.

#[cfg(test)]
pub(crate) mod mock;
pub mod traits;
pub mod websocket;

pub use traits::{FrameReceiver, Transport, TransportConnector, TransportSession};
pub use websocket::{
    TransportError, WebSocketConnector, WebSocketTransport, DEFAULT_CLOSE_TIMEOUT,
    DEFAULT_CONNECT_TIMEOUT,
};
