//! End-to-end: two clients talking through the development server

use chathub_client::protocol::ChatMessage;
use chathub_client::{Envelope, EventKind, RealtimeConfig, RealtimeConnection};
use chathub_devserver::{serve, SessionManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> (SocketAddr, Arc<SessionManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let sessions = Arc::new(SessionManager::new());

    let s = sessions.clone();
    tokio::spawn(async move {
        let _ = serve(listener, s).await;
    });

    (addr, sessions)
}

struct Client {
    conn: RealtimeConnection,
    inbox: mpsc::UnboundedReceiver<Envelope>,
}

impl Client {
    fn connect(addr: SocketAddr, user_id: &str) -> Self {
        let conn = RealtimeConnection::new(RealtimeConfig {
            endpoint: format!("ws://{}/ws/chat", addr),
            ..Default::default()
        });

        let (tx, inbox) = mpsc::unbounded_channel();
        conn.on_message(move |envelope| {
            let _ = tx.send(envelope.clone());
        });
        conn.open(user_id);

        Self { conn, inbox }
    }

    /// Next inbound envelope of `kind`, skipping others
    async fn expect(&mut self, kind: EventKind) -> Envelope {
        timeout(WAIT, async {
            loop {
                let envelope = self.inbox.recv().await.expect("handler channel closed");
                if envelope.kind == kind {
                    return envelope;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", kind))
    }
}

async fn wait_online(sessions: &SessionManager, user_id: &str) {
    timeout(WAIT, async {
        while !sessions.is_online(user_id).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("user never came online");
}

#[tokio::test]
async fn test_connect_chat_and_close() {
    let (addr, sessions) = start_server().await;

    let mut alice = Client::connect(addr, "alice");
    let mut bob = Client::connect(addr, "bob");

    let established = alice.expect(EventKind::ConnectionEstablished).await;
    assert_eq!(established.payload["userId"], "alice");
    bob.expect(EventKind::ConnectionEstablished).await;
    assert!(alice.conn.is_connected());
    wait_online(&sessions, "bob").await;

    assert!(alice.conn.send_chat_message("bob", "hello bob", "c-1"));

    let delivered = alice.expect(EventKind::MessageDelivered).await;
    assert_eq!(delivered.payload["clientMessageId"], "c-1");

    let pushed = bob.expect(EventKind::NewMessage).await;
    let message: ChatMessage = pushed.payload_as().unwrap();
    assert_eq!(message.sender_id, "alice");
    assert_eq!(message.content, "hello bob");
    assert_eq!(message.conversation_id, "alice_bob");
    assert_eq!(delivered.payload["messageId"], message.message_id.as_str());

    assert!(bob.conn.mark_read(&message.conversation_id));
    let receipt = alice.expect(EventKind::MessageReadReceipt).await;
    assert_eq!(receipt.payload["readBy"], "bob");

    alice.conn.close();
    assert!(!alice.conn.is_connected());
    timeout(WAIT, async {
        while sessions.is_online("alice").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never saw alice leave");

    bob.conn.close();
}

#[tokio::test]
async fn test_server_errors_arrive_as_envelopes() {
    let (addr, _sessions) = start_server().await;
    let mut alice = Client::connect(addr, "alice");
    alice.expect(EventKind::ConnectionEstablished).await;

    assert!(alice.conn.send_chat_message("bob", &"x".repeat(2001), "c-1"));
    let error = alice.expect(EventKind::Error).await;
    assert_eq!(error.payload["code"], "CONTENT_TOO_LONG");

    assert!(alice.conn.send(&Envelope::ping()));
    alice.expect(EventKind::Pong).await;
    assert!(alice.conn.is_connected());

    alice.conn.close();
}

#[tokio::test]
async fn test_rejected_handshake_reports_disconnect() {
    let (addr, _sessions) = start_server().await;
    let conn = RealtimeConnection::new(RealtimeConfig {
        endpoint: format!("ws://{}/ws/other", addr),
        ..Default::default()
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.on_disconnect(move |reason| {
        let _ = tx.send(reason.clone());
    });
    conn.open("alice");

    let reason = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(!reason.intentional);
    assert!(!conn.is_connected());
    assert!(conn.reconnect_pending());

    conn.close();
    assert!(!conn.reconnect_pending());
}
