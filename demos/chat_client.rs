//! Chat client - end-to-end use of a framelink connection.
//!
//! This demo:
//! - Registers typed handlers in a `MessageRegistry`
//! - Completes the server's session handshake (`MsgNetStat`)
//! - Sends every stdin line as a chat message
//! - Exits when the server goes away
//!
//! # Running
//!
//! ```text
//! RUST_LOG=framelink=debug cargo run --example chat_client -- 127.0.0.1 7777
//! ```
//!
//! A JSON config file may be passed instead of host and port:
//!
//! ```text
//! cargo run --example chat_client -- --config client.json
//! ```

use std::sync::Arc;

use framelink::{Connection, ConnectionConfig, ConnectionEvent, Message, MessageRegistry};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Session handshake. The server sends it first; the client echoes it back
/// with its address filled in.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct MsgNetStat {
    id: String,
    #[serde(default)]
    ip_address: String,
}

impl Message for MsgNetStat {
    const TYPE_NAME: &'static str = "MsgNetStat";
}

#[derive(Serialize, Deserialize, Debug)]
struct MsgChat {
    sender: String,
    text: String,
}

impl Message for MsgChat {
    const TYPE_NAME: &'static str = "MsgChat";
}

fn load_config() -> Result<ConnectionConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match args.as_slice() {
        [flag, path] if flag == "--config" => {
            ConnectionConfig::from_json_str(&std::fs::read_to_string(path)?)?
        }
        [host, port] => ConnectionConfig::new(host.clone(), port.parse()?),
        _ => ConnectionConfig::new("127.0.0.1", 7777),
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;

    // Handlers run on the receive task; anything that needs the connection
    // is forwarded to the main loop.
    let (handshake_tx, mut handshake_rx) = mpsc::unbounded_channel();
    let mut registry = MessageRegistry::new();
    registry.register(move |stat: MsgNetStat| {
        let _ = handshake_tx.send(stat);
        Ok(())
    });
    registry.register(|chat: MsgChat| {
        info!(sender = %chat.sender, "{}", chat.text);
        Ok(())
    });

    let connection = Arc::new(
        Connection::builder()
            .config(config)
            .auto_connect(false)
            .dispatcher(registry)
            .build()?,
    );
    let mut events = connection.subscribe();
    connection.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(mut stat) = handshake_rx.recv() => {
                connection.set_session_id(stat.id.clone())?;
                stat.ip_address = connection
                    .local_addr()
                    .map(|addr| addr.ip().to_string())
                    .unwrap_or_default();
                connection.send_message(&stat).await?;
                info!(session = %stat.id, "Session established");
            }
            line = lines.next_line() => {
                let Some(text) = line? else { break };
                let chat = MsgChat {
                    sender: connection.session_id().unwrap_or_default(),
                    text,
                };
                if let Err(e) = connection.send_message(&chat).await {
                    warn!(error = %e, "Send failed");
                }
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::Disconnected(reason)) => {
                    warn!(%reason, "Connection lost");
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }

    connection.disconnect();
    info!(stats = ?connection.stats(), "Bye");
    Ok(())
}
