//! ChatHub realtime client
//!
//! A [`RealtimeConnection`] keeps one WebSocket session to the chat server,
//! pings it while open, reconnects after unexpected closures and fans inbound
//! [`Envelope`]s out to subscribers.

pub mod connection;
pub mod credentials;
pub mod transport;

pub use chathub_protocol::{
    self as protocol, realtime, state_machine::ConnectionState, Envelope, EventKind,
};
pub use connection::{DisconnectReason, RealtimeConfig, RealtimeConnection, Subscription};
pub use credentials::{CredentialSource, EnvCredential, StaticCredential};
