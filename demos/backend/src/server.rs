//! Backend server implementation.

use crate::store::Store;
use futures_util::{SinkExt, StreamExt};
use savesync_core::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

type SharedStore = Arc<RwLock<Store>>;
type Sink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, Message>;

pub async fn run(port: u16, latency: Duration) -> anyhow::Result<()> {
    let store = Arc::new(RwLock::new(Store::new()));

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}/save", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let store = store.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, store, latency).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    store: SharedStore,
    latency: Duration,
) -> anyhow::Result<()> {
    let mut identity = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        identity = req.uri().query().and_then(query_id);
        Ok(resp)
    })
    .await?;
    let identity = identity.unwrap_or_else(|| addr.to_string());
    let (mut sink, mut stream) = ws.split();

    tracing::info!("{} connected from {}", identity, addr);

    while let Some(msg) = stream.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let message: ClientMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                let error = ServerMessage::Error {
                    request_id: None,
                    error: format!("Malformed message: {}", e),
                };
                send(&mut sink, &error).await?;
                continue;
            }
        };

        handle_message(&store, &identity, message, &mut sink, latency).await?;
    }

    tracing::info!("{} disconnected", identity);
    Ok(())
}

async fn handle_message(
    store: &SharedStore,
    identity: &str,
    message: ClientMessage,
    sink: &mut Sink,
    latency: Duration,
) -> anyhow::Result<()> {
    match message {
        ClientMessage::Save { payload } => {
            let mut store = store.write().await;
            let result = store.save(payload);
            match result {
                Ok((player_id, revision)) => {
                    tracing::info!(
                        "{} saved {} (revision {}, {} records)",
                        identity,
                        player_id,
                        revision,
                        store.len()
                    );
                }
                Err(e) => {
                    drop(store);
                    tracing::warn!("{} sent an invalid save: {}", identity, e);
                    let error = ServerMessage::Error {
                        request_id: None,
                        error: format!("Invalid save: {}", e),
                    };
                    send(sink, &error).await?;
                }
            }
        }

        ClientMessage::Load {
            steam_id,
            request_id,
        } => {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let payload = match store.read().await.load(&steam_id) {
                Some(record) => {
                    tracing::info!(
                        "{} loaded {} (revision {})",
                        identity,
                        steam_id,
                        record.revision
                    );
                    Some(record.payload.clone())
                }
                None => {
                    tracing::info!("{} loaded {} (not found)", identity, steam_id);
                    None
                }
            };

            let response = ServerMessage::LoadResponse {
                request_id,
                found: payload.is_some(),
                payload,
            };
            send(sink, &response).await?;
        }
    }

    Ok(())
}

async fn send(sink: &mut Sink, message: &ServerMessage) -> anyhow::Result<()> {
    sink.send(Message::Text(serde_json::to_string(message)?.into()))
        .await?;
    Ok(())
}

/// Pull `id` out of a query string.
fn query_id(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "id")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
