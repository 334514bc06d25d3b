//! In-memory transport for exercising the connection core without sockets

use crate::transport::traits::{Transport, TransportConnector, TransportSession};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

/// Test-side view of one accepted session
#[derive(Clone)]
pub(crate) struct MockSession {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    frames_tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl MockSession {
    /// Deliver an inbound frame as if the server sent it
    pub fn push_frame(&self, text: &str) {
        if let Some(tx) = self.frames_tx.lock().as_ref() {
            let _ = tx.send(text.to_string());
        }
    }

    /// Simulate the server or network dropping the session
    pub fn drop_connection(&self) {
        self.frames_tx.lock().take();
    }

    /// Frames the client transmitted on this session
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_envelopes(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Whether the client asked this session to close
    pub fn close_requested(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockTransport {
    session: MockSession,
}

impl Transport for MockTransport {
    fn send_text(&self, text: String) -> Result<()> {
        if self.session.close_requested() {
            return Err(anyhow!("mock transport closed"));
        }
        self.session.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.session.closed.store(true, Ordering::SeqCst);
        // The peer acknowledges the close by ending the stream
        self.session.drop_connection();
    }
}

#[derive(Default)]
struct MockState {
    refuse: bool,
    connect_delay: Option<Duration>,
    attempts: Vec<(Url, Instant)>,
    sessions: Vec<MockSession>,
}

/// Connector handing out in-memory sessions; clones share state
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following connect attempt fail (or succeed again)
    pub fn set_refuse(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Delay every following connect attempt
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        self.state.lock().connect_delay = delay;
    }

    /// Number of connect attempts so far
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// Instants at which connect attempts started
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().attempts.iter().map(|(_, at)| *at).collect()
    }

    pub fn attempt_urls(&self) -> Vec<Url> {
        self.state.lock().attempts.iter().map(|(url, _)| url.clone()).collect()
    }

    /// Sessions accepted so far, oldest first
    pub fn sessions(&self) -> Vec<MockSession> {
        self.state.lock().sessions.clone()
    }

    /// The most recently accepted session
    pub fn last_session(&self) -> MockSession {
        self.sessions()
            .pop()
            .expect("no session has been accepted yet")
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<TransportSession> {
        let delay = {
            let mut state = self.state.lock();
            state.attempts.push((url.clone(), Instant::now()));
            state.connect_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.refuse {
            return Err(anyhow!("connection refused"));
        }

        let (frames_tx, frames) = mpsc::unbounded_channel();
        let session = MockSession {
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            frames_tx: Arc::new(Mutex::new(Some(frames_tx))),
        };
        state.sessions.push(session.clone());

        Ok(TransportSession {
            transport: Arc::new(MockTransport { session }),
            frames,
        })
    }

    fn name(&self) -> &'static str {
        "Mock"
    }
}
