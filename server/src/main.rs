use chathub_devserver::{serve, SessionManager};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const BIND_VAR: &str = "CHATHUB_BIND";
const DEFAULT_BIND: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let bind = std::env::var(BIND_VAR).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = TcpListener::bind(&bind).await?;
    info!("Serving ws://{}{}", bind, chathub_devserver::CHAT_PATH);

    let sessions = Arc::new(SessionManager::new());

    tokio::select! {
        result = serve(listener, sessions) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
