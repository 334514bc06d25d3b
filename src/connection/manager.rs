//! Realtime connection with heartbeat, automatic reconnection and handler fan-out

use crate::connection::registry::{HandlerRegistry, Subscription};
use crate::connection::timer::{TimerSlot, TimerStats};
use crate::credentials::CredentialSource;
use crate::transport::{Transport, TransportConnector, TransportSession, WebSocketConnector};
use chathub_protocol::{
    codec, realtime,
    state_machine::{
        ConnectionEvent, ConnectionState, ConnectionStateMachine, RetryState, TransitionResult,
    },
    Envelope,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use url::Url;

pub type MessageHandler = dyn Fn(&Envelope) + Send + Sync;
pub type ConnectHandler = dyn Fn() + Send + Sync;
pub type DisconnectHandler = dyn Fn(&DisconnectReason) + Send + Sync;

/// Why a session ended, as passed to disconnect handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub message: String,
    /// `true` when the closure followed a call to [`RealtimeConnection::close`]
    pub intentional: bool,
}

/// Configuration for the realtime connection
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Realtime endpoint; the credential is added as the `token` query parameter
    pub endpoint: String,
    /// Interval between heartbeat pings while open
    pub heartbeat_interval: Duration,
    /// Reconnect attempt N waits N times this delay
    pub reconnect_base_delay: Duration,
    /// Automatic reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: realtime::DEFAULT_ENDPOINT.into(),
            heartbeat_interval: Duration::from_millis(realtime::HEARTBEAT_INTERVAL_MS),
            reconnect_base_delay: Duration::from_millis(realtime::RECONNECT_BASE_DELAY_MS),
            max_reconnect_attempts: realtime::MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Builder for [`RealtimeConnection`]
pub struct RealtimeConnectionBuilder {
    config: RealtimeConfig,
    connector: Option<Arc<dyn TransportConnector>>,
    credentials: Option<Arc<dyn CredentialSource>>,
}

impl RealtimeConnectionBuilder {
    pub fn config(mut self, config: RealtimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of WebSocket
    pub fn connector(mut self, connector: impl TransportConnector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Source consulted for a fresh token whenever a reconnect fires
    pub fn credential_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.credentials = Some(Arc::new(source));
        self
    }

    pub fn build(self) -> RealtimeConnection {
        let retry = RetryState::new(
            self.config.max_reconnect_attempts,
            self.config.reconnect_base_delay,
        );

        RealtimeConnection {
            inner: Arc::new(ConnectionInner {
                connector: self
                    .connector
                    .unwrap_or_else(|| Arc::new(WebSocketConnector::default())),
                credentials: self.credentials,
                config: self.config,
                state: Mutex::new(SharedState {
                    fsm: ConnectionStateMachine::new(),
                    session: None,
                    next_session_id: 0,
                    intentional_close: false,
                    retry,
                    last_credential: None,
                    heartbeat: TimerSlot::new(),
                    reconnect: TimerSlot::new(),
                }),
                message_handlers: HandlerRegistry::new("message"),
                connect_handlers: HandlerRegistry::new("connect"),
                disconnect_handlers: HandlerRegistry::new("disconnect"),
            }),
        }
    }
}

/// The live (or pending) transport session
struct ActiveSession {
    id: u64,
    /// `None` until the transport confirms it is open
    transport: Option<Arc<dyn Transport>>,
    shutdown: Arc<Notify>,
}

struct SharedState {
    fsm: ConnectionStateMachine,
    session: Option<ActiveSession>,
    next_session_id: u64,
    intentional_close: bool,
    retry: RetryState,
    last_credential: Option<String>,
    heartbeat: TimerSlot,
    reconnect: TimerSlot,
}

impl SharedState {
    fn is_current(&self, session_id: u64) -> bool {
        matches!(&self.session, Some(session) if session.id == session_id)
    }
}

struct ConnectionInner {
    config: RealtimeConfig,
    connector: Arc<dyn TransportConnector>,
    credentials: Option<Arc<dyn CredentialSource>>,
    state: Mutex<SharedState>,
    message_handlers: HandlerRegistry<MessageHandler>,
    connect_handlers: HandlerRegistry<ConnectHandler>,
    disconnect_handlers: HandlerRegistry<DisconnectHandler>,
}

/// What started an open
#[derive(Debug, Clone, Copy)]
enum OpenTrigger {
    Caller,
    Retry { generation: u64 },
}

/// Owns one realtime session at a time.
///
/// Cloning is cheap and every clone controls the same session. The caller that
/// coordinates `open`/`close` should be the single owner; call [`close`] before
/// dropping the last handle, an open session keeps itself alive.
///
/// [`close`]: RealtimeConnection::close
#[derive(Clone)]
pub struct RealtimeConnection {
    inner: Arc<ConnectionInner>,
}

impl RealtimeConnection {
    pub fn builder() -> RealtimeConnectionBuilder {
        RealtimeConnectionBuilder {
            config: RealtimeConfig::default(),
            connector: None,
            credentials: None,
        }
    }

    /// WebSocket connection with the given configuration
    pub fn new(config: RealtimeConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Start connecting with `credential`. Returns immediately; success or
    /// failure is reported through the connect/disconnect handlers.
    ///
    /// Does nothing if a session is already open or connecting. Must be
    /// called from within a tokio runtime.
    pub fn open(&self, credential: impl Into<String>) {
        self.open_with(credential.into(), OpenTrigger::Caller);
    }

    fn open_with(&self, credential: String, trigger: OpenTrigger) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot open realtime connection outside a tokio runtime: {}", e);
                return;
            }
        };

        // A bad endpoint fails the attempt like a refused connect
        let endpoint = self.endpoint_url(&credential).map_err(|e| {
            format!("invalid endpoint {:?}: {}", self.inner.config.endpoint, e)
        });

        let (session_id, shutdown) = {
            let mut state = self.inner.state.lock();

            let event = match trigger {
                OpenTrigger::Caller => ConnectionEvent::OpenRequested,
                OpenTrigger::Retry { generation } => {
                    // close() or a manual open() got here first
                    if !state.reconnect.complete(generation) {
                        debug!("Reconnect {} superseded, not opening", generation);
                        return;
                    }
                    ConnectionEvent::RetryFired
                }
            };

            match state.fsm.state() {
                ConnectionState::Open => {
                    warn!("Realtime connection already open");
                    return;
                }
                ConnectionState::Connecting => {
                    warn!("Realtime connection already connecting");
                    return;
                }
                _ => {}
            }

            if let TransitionResult::Invalid { from, event } = state.fsm.process_event(event) {
                warn!("Ignoring {:?} while {}", event, from);
                return;
            }

            state.reconnect.cancel();
            state.intentional_close = false;
            state.last_credential = Some(credential);
            state.next_session_id += 1;

            let session_id = state.next_session_id;
            let shutdown = Arc::new(Notify::new());
            state.session = Some(ActiveSession {
                id: session_id,
                transport: None,
                shutdown: shutdown.clone(),
            });

            (session_id, shutdown)
        };

        info!(
            "Opening realtime session {} via {}",
            session_id,
            self.inner.connector.name()
        );

        let this = self.clone();
        runtime.spawn(async move {
            this.run_session(session_id, endpoint, shutdown).await;
        });
    }

    fn endpoint_url(&self, credential: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.inner.config.endpoint)?;
        url.query_pairs_mut()
            .append_pair(realtime::TOKEN_QUERY_PARAM, credential);
        Ok(url)
    }

    /// Drive one session from connect to closure
    async fn run_session(
        self,
        session_id: u64,
        endpoint: Result<Url, String>,
        shutdown: Arc<Notify>,
    ) {
        let url = match endpoint {
            Ok(url) => url,
            Err(reason) => {
                error!("Realtime connect failed: {}", reason);
                self.handle_closed(session_id, reason);
                return;
            }
        };

        let connected = tokio::select! {
            result = self.inner.connector.connect(&url) => result,
            _ = shutdown.notified() => {
                self.handle_closed(session_id, "closed before transport opened".into());
                return;
            }
        };

        let TransportSession {
            transport,
            mut frames,
        } = match connected {
            Ok(session) => session,
            Err(e) => {
                warn!("Realtime connect failed: {:#}", e);
                self.handle_closed(session_id, format!("connect failed: {}", e));
                return;
            }
        };

        if !self.handle_opened(session_id, transport.clone()) {
            transport.close();
            self.handle_closed(session_id, "closed before transport opened".into());
            return;
        }

        let reason = loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(text) => self.dispatch_frame(&text),
                    None => break "transport closed".to_string(),
                },
                // close() already asked the transport to shut down
                _ = shutdown.notified() => break "closed by caller".to_string(),
            }
        };

        self.handle_closed(session_id, reason);
    }

    /// Returns `false` if the session was closed while connecting
    fn handle_opened(&self, session_id: u64, transport: Arc<dyn Transport>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !state.is_current(session_id) {
                return false;
            }

            if let TransitionResult::Invalid { from, event } =
                state.fsm.process_event(ConnectionEvent::TransportOpened)
            {
                warn!("Unexpected {:?} while {}", event, from);
                return false;
            }

            if let Some(session) = state.session.as_mut() {
                session.transport = Some(transport);
            }
            state.retry.reset();
            self.start_heartbeat(&mut state, session_id);
        }

        info!("Realtime session {} open", session_id);
        self.inner.connect_handlers.dispatch(|handler| handler());
        true
    }

    fn start_heartbeat(&self, state: &mut SharedState, session_id: u64) {
        let weak = Arc::downgrade(&self.inner);
        state
            .heartbeat
            .schedule_every(self.inner.config.heartbeat_interval, move |generation| {
                if let Some(conn) = upgrade(&weak) {
                    conn.heartbeat_tick(session_id, generation);
                }
            });
    }

    fn heartbeat_tick(&self, session_id: u64, generation: u64) {
        let transport = {
            let state = self.inner.state.lock();
            if !state.heartbeat.is_current(generation)
                || !state.is_current(session_id)
                || state.fsm.state() != ConnectionState::Open
            {
                return;
            }
            state.session.as_ref().and_then(|s| s.transport.clone())
        };

        if let Some(transport) = transport {
            debug!("Sending heartbeat on session {}", session_id);
            transmit(transport.as_ref(), &Envelope::ping());
        }
    }

    fn dispatch_frame(&self, text: &str) {
        match codec::decode(text) {
            Ok(envelope) => {
                debug!("Received {} envelope", envelope.kind);
                self.inner
                    .message_handlers
                    .dispatch(|handler| handler(&envelope));
            }
            Err(e) => {
                error!("Dropping malformed realtime frame: {}", e);
            }
        }
    }

    fn handle_closed(&self, session_id: u64, message: String) {
        let intentional = {
            let mut state = self.inner.state.lock();

            if state.is_current(session_id) {
                state.session = None;
                state.heartbeat.cancel();
                state.fsm.process_event(ConnectionEvent::TransportClosed);

                let intentional = state.intentional_close;
                if !intentional {
                    match state.retry.next_delay() {
                        Some(delay) => {
                            info!(
                                "Reconnecting in {}ms (attempt {}/{})",
                                delay.as_millis(),
                                state.retry.attempts(),
                                state.retry.max_attempts()
                            );
                            self.schedule_reconnect(&mut state, delay);
                        }
                        None => {
                            warn!(
                                "Giving up after {} reconnect attempts",
                                state.retry.attempts()
                            );
                        }
                    }
                }
                intentional
            } else {
                // Released by close() (or replaced) before its transport finished
                true
            }
        };

        info!("Realtime session {} disconnected: {}", session_id, message);

        let reason = DisconnectReason {
            message,
            intentional,
        };
        self.inner
            .disconnect_handlers
            .dispatch(|handler| handler(&reason));
    }

    fn schedule_reconnect(&self, state: &mut SharedState, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        state.reconnect.schedule_once(delay, move |generation| async move {
            if let Some(conn) = upgrade(&weak) {
                conn.fire_reconnect(generation);
            }
        });
    }

    fn fire_reconnect(&self, generation: u64) {
        let last_credential = {
            let state = self.inner.state.lock();
            if !state.reconnect.is_current(generation) {
                return;
            }
            state.last_credential.clone()
        };

        let credential = match &self.inner.credentials {
            Some(source) => source.current_token(),
            None => last_credential,
        };

        match credential {
            Some(credential) => self.open_with(credential, OpenTrigger::Retry { generation }),
            None => {
                let mut state = self.inner.state.lock();
                if state.reconnect.complete(generation) {
                    warn!("No credential available, abandoning reconnect");
                }
            }
        }
    }

    /// Transmit `envelope` if the session is open. Fire-and-forget: when not
    /// open the envelope is logged and dropped. Returns whether it was handed
    /// to the transport.
    pub fn send(&self, envelope: &Envelope) -> bool {
        let transport = {
            let state = self.inner.state.lock();
            if state.fsm.state() == ConnectionState::Open {
                state.session.as_ref().and_then(|s| s.transport.clone())
            } else {
                None
            }
        };

        match transport {
            Some(transport) => transmit(transport.as_ref(), envelope),
            None => {
                error!(
                    "Realtime connection is not open, dropping {} envelope",
                    envelope.kind
                );
                false
            }
        }
    }

    /// Send a chat message with a caller-supplied idempotency id
    pub fn send_chat_message(
        &self,
        recipient_id: &str,
        content: &str,
        client_message_id: &str,
    ) -> bool {
        self.send(&Envelope::send_message(
            recipient_id,
            content,
            client_message_id,
        ))
    }

    /// Send a chat message with a generated idempotency id, which is returned
    pub fn send_chat_message_auto(&self, recipient_id: &str, content: &str) -> String {
        let client_message_id = uuid::Uuid::new_v4().to_string();
        self.send_chat_message(recipient_id, content, &client_message_id);
        client_message_id
    }

    pub fn send_typing_start(&self, recipient_id: &str) -> bool {
        self.send(&Envelope::typing_start(recipient_id))
    }

    pub fn send_typing_stop(&self, recipient_id: &str) -> bool {
        self.send(&Envelope::typing_stop(recipient_id))
    }

    /// Mark a conversation as read
    pub fn mark_read(&self, conversation_id: &str) -> bool {
        self.send(&Envelope::message_read(conversation_id))
    }

    /// Close the session. Idempotent.
    ///
    /// Closing a connection that was never opened leaves it `Idle`; from any
    /// other state it ends `Closed`.
    ///
    /// Heartbeat and reconnect timers are cancelled before this returns;
    /// disconnect handlers fire once the session's driver observes the close.
    pub fn close(&self) {
        let session = {
            let mut state = self.inner.state.lock();
            state.intentional_close = true;
            state.heartbeat.cancel();
            state.reconnect.cancel();

            let session = state.session.take();
            if let TransitionResult::Success(ConnectionState::Closing) =
                state.fsm.process_event(ConnectionEvent::CloseRequested)
            {
                state.fsm.process_event(ConnectionEvent::TransportReleased);
            }
            session
        };

        if let Some(session) = session {
            info!("Closing realtime session {}", session.id);
            if let Some(transport) = session.transport {
                transport.close();
            }
            session.shutdown.notify_one();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().fsm.state()
    }

    /// Reconnect attempts consumed since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().retry.attempts()
    }

    /// Whether an automatic reconnect is scheduled
    pub fn reconnect_pending(&self) -> bool {
        self.inner.state.lock().reconnect.is_armed()
    }

    pub fn heartbeat_stats(&self) -> TimerStats {
        self.inner.state.lock().heartbeat.stats()
    }

    /// Called for every inbound envelope, in registration order
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.message_handlers.register(Arc::new(handler))
    }

    /// Called once per successful open
    pub fn on_connect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.connect_handlers.register(Arc::new(handler))
    }

    /// Called once per closure, intentional or not, including failed connects
    pub fn on_disconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.inner.disconnect_handlers.register(Arc::new(handler))
    }
}

fn upgrade(weak: &Weak<ConnectionInner>) -> Option<RealtimeConnection> {
    weak.upgrade().map(|inner| RealtimeConnection { inner })
}

fn transmit(transport: &dyn Transport, envelope: &Envelope) -> bool {
    let text = match codec::encode(envelope) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode {} envelope: {}", envelope.kind, e);
            return false;
        }
    };

    match transport.send_text(text) {
        Ok(()) => {
            debug!("Sent {} envelope", envelope.kind);
            true
        }
        Err(e) => {
            error!("Failed to send {} envelope: {:#}", envelope.kind, e);
            false
        }
    }
}
