//! Realtime connection management
//!
//! This module handles:
//! - A single WebSocket session with automatic reconnection (linear backoff)
//! - Heartbeat pings while the session is open
//! - Fan-out of inbound envelopes and lifecycle events to registered handlers

mod manager;
mod registry;
mod timer;


pub use manager::{
    ConnectHandler, DisconnectHandler, DisconnectReason, MessageHandler, RealtimeConfig,
    RealtimeConnection, RealtimeConnectionBuilder,
};
pub use registry::{HandlerRegistry, Subscription};
pub use timer::{TimerSlot, TimerStats};
