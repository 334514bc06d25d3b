//! Session management for connected chat users
//!
//! This module handles:
//! - Accepting authenticated WebSocket upgrades
//! - Tracking one live session per user
//! - Routing envelopes to a specific user

mod connection;
mod manager;

pub use connection::{run_session, token_from_query, SessionHandle, CHAT_PATH};
pub use manager::SessionManager;
