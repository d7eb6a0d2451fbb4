//! WebSocket transport for the broadcast layer (component design §4.7 "Transport"), adapted from
//! the reference stack's own `barter-data-server` binary: an accept loop hands each connection a
//! fresh broadcast receiver, and a lagging client is logged and kept rather than dropped.

use crate::wire::ServerMessage;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

pub async fn run(bind: SocketAddr, tx: broadcast::Sender<ServerMessage>) {
    let listener = match TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%bind, %error, "failed to bind arb-server websocket listener");
            return;
        }
    };

    info!(%bind, "arb-server listening");

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let rx = tx.subscribe();
        tokio::spawn(handle_client(stream, peer_addr, rx));
    }
}

async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, mut rx: broadcast::Receiver<ServerMessage>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(error) => {
            warn!(%peer_addr, %error, "websocket handshake failed");
            return;
        }
    };

    info!(%peer_addr, "client connected");
    let (mut sender, mut receiver) = ws_stream.split();

    let welcome = serde_json::json!({"type": "welcome", "message": "connected to arb-server rates feed"});
    if let Ok(text) = serde_json::to_string(&welcome) {
        let _ = sender.send(Message::Text(text.into())).await;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if let Ok(text) = serde_json::to_string(&message) {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%peer_addr, skipped, "client lagged behind the rates feed, continuing");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(%peer_addr, "client disconnected");
}
