use chathub_client::protocol::{ChatMessage, ErrorPayload, MessageDeliveredPayload, UserTypingPayload};
use chathub_client::{
    CredentialSource, EnvCredential, Envelope, EventKind, RealtimeConfig, RealtimeConnection,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ENDPOINT_VAR: &str = "CHATHUB_WS_URL";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let mut config = RealtimeConfig::default();
    if let Ok(endpoint) = std::env::var(ENDPOINT_VAR) {
        config.endpoint = endpoint;
    }

    let credentials = EnvCredential::default();
    let token = match credentials.current_token() {
        Some(token) => token,
        None => {
            error!(
                "No credential: set {} to the token to connect with",
                EnvCredential::DEFAULT_VAR
            );
            return;
        }
    };

    info!("Chat client starting");
    info!("  Endpoint: {}", config.endpoint);

    let conn = RealtimeConnection::builder()
        .config(config)
        .credential_source(credentials)
        .build();

    conn.on_connect(|| info!("Connected"));
    conn.on_disconnect(|reason| {
        if reason.intentional {
            info!("Disconnected: {}", reason.message);
        } else {
            warn!("Connection lost: {}", reason.message);
        }
    });
    conn.on_message(handle_server_message);

    conn.open(token);

    info!("Type `<recipient> <message>` to chat, Ctrl-C to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_input(&conn, line.trim()),
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    conn.close();
}

fn handle_input(conn: &RealtimeConnection, line: &str) {
    if line.is_empty() {
        return;
    }

    match line.split_once(' ') {
        Some((recipient, content)) if !content.trim().is_empty() => {
            if !conn.is_connected() {
                warn!("Not connected, message to {} not sent", recipient);
                return;
            }
            let client_id = conn.send_chat_message_auto(recipient, content.trim());
            debug!("Sent message {} to {}", client_id, recipient);
        }
        _ => warn!("Usage: <recipient> <message>"),
    }
}

fn handle_server_message(envelope: &Envelope) {
    match envelope.kind {
        EventKind::NewMessage => match envelope.payload_as::<ChatMessage>() {
            Ok(msg) => info!("[{}] {}: {}", msg.conversation_id, msg.sender_id, msg.content),
            Err(e) => warn!("Malformed NEW_MESSAGE payload: {}", e),
        },
        EventKind::MessageDelivered => {
            if let Ok(ack) = envelope.payload_as::<MessageDeliveredPayload>() {
                debug!("Delivered {} as {}", ack.client_message_id, ack.message_id);
            }
        }
        EventKind::UserTyping => {
            if let Ok(typing) = envelope.payload_as::<UserTypingPayload>() {
                if typing.is_typing {
                    info!("{} is typing...", typing.user_id);
                }
            }
        }
        EventKind::Error => match envelope.payload_as::<ErrorPayload>() {
            Ok(err) => error!("Server error {}: {}", err.code, err.message),
            Err(_) => error!("Server error: {}", envelope.payload),
        },
        EventKind::Pong => debug!("Heartbeat acknowledged"),
        kind => debug!("Unhandled {} envelope", kind),
    }
}
