//! Connection State Machine
//!
//! Defines valid connection state transitions and the reconnect budget.

use std::time::Duration;

use crate::realtime;

/// Lifecycle state of a realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never opened
    Idle,
    /// Transport requested, not yet confirmed
    Connecting,
    /// Transport confirmed open
    Open,
    /// Close requested, transport not yet released
    Closing,
    /// No live transport
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Caller asked to open a session
    OpenRequested,
    /// Transport confirmed the session is open
    TransportOpened,
    /// Transport reported closure (or failed to open)
    TransportClosed,
    /// Caller asked to close the session
    CloseRequested,
    /// Transport reference dropped after a close request
    TransportReleased,
    /// Reconnect timer fired
    RetryFired,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed put)
    Success(ConnectionState),
    /// Transition was invalid from current state
    Invalid {
        from: ConnectionState,
        event: ConnectionEvent,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success(_))
    }
}

/// The connection state machine
#[derive(Debug)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Idle,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ConnectionEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self.current_state, event) {
            (Idle | Closed, OpenRequested) => Some(Connecting),
            (Closed, RetryFired) => Some(Connecting),

            (Connecting, TransportOpened) => Some(Open),

            (Connecting | Open, TransportClosed) => Some(Closed),

            // close() is idempotent
            (Connecting | Open | Closing, CloseRequested) => Some(Closing),
            (Idle | Closed, CloseRequested) => Some(self.current_state),
            (Closing, TransportReleased) => Some(Closed),

            _ => None,
        }
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (Idle | Closed, Connecting) => true,
        (Connecting, Open) => true,
        (Connecting | Open, Closing | Closed) => true,
        (Closing, Closed) => true,
        _ => false,
    }
}

/// Reconnect budget with linear backoff
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(
            realtime::MAX_RECONNECT_ATTEMPTS,
            Duration::from_millis(realtime::RECONNECT_BASE_DELAY_MS),
        )
    }
}

impl RetryState {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            base_delay,
        }
    }

    /// Attempts consumed since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Consume one attempt and return its delay, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.base_delay * self.attempts)
    }

    /// Called on a successful open
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
