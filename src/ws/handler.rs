//! Renderer WebSocket stream

use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Replies queued for one renderer besides the shared stream
const REPLY_CAPACITY: usize = 8;

static NEXT_RENDERER: AtomicU64 = AtomicU64::new(1);

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let renderer = NEXT_RENDERER.fetch_add(1, Ordering::Relaxed);
    ws.on_upgrade(move |socket| handle_socket(socket, renderer, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, renderer: u64, state: AppState) {
    info!(renderer, "Renderer connected");

    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before the first snapshot so nothing falls in between
    let snapshot_rx = state.render_tx.subscribe();

    let welcome = ServerMsg::Welcome {
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(renderer, error = %e, "Failed to send welcome");
        return;
    }

    let current = state.snapshot();
    let initial = ServerMsg::Snapshot {
        frame: current.frame,
        state: current,
        events: Vec::new(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &initial).await {
        debug!(renderer, error = %e, "Failed to send initial snapshot");
        return;
    }

    run_session(renderer, ws_sink, ws_stream, snapshot_rx).await;

    info!(renderer, "Renderer disconnected");
}

/// Run the renderer session with read/write split
async fn run_session(
    renderer: u64,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut snapshot_rx: broadcast::Receiver<ServerMsg>,
) {
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(REPLY_CAPACITY);

    // Writer task: broadcast snapshots and direct replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(reply) = reply_rx.recv() => reply,
                received = snapshot_rx.recv() => match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(renderer, lagged_count = n, "Renderer lagged, skipping {} snapshots", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(renderer, "Snapshot channel closed");
                        break;
                    }
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(renderer, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: only pings and close matter
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(ClientMsg::Ping { t }) => {
                    if reply_tx.send(ServerMsg::Pong { t }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(renderer, error = %e, "Failed to parse renderer message");
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(renderer, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(renderer, "Renderer initiated close");
                break;
            }
            Err(e) => {
                error!(renderer, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
    use tokio_util::sync::CancellationToken;

    use crate::config::Config;
    use crate::http::build_router;

    async fn next_json(socket: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> serde_json::Value {
        loop {
            if let WsMessage::Text(text) = socket.next().await.unwrap().unwrap() {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn renderer_gets_welcome_snapshot_and_pong() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            settings_path: dir.path().join("settings.json"),
            rng_seed: Some(3),
            ..Config::default()
        };
        let (state, runtime) = AppState::new(config);
        let shutdown = CancellationToken::new();
        tokio::spawn(runtime.run(shutdown.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();

        let welcome = next_json(&mut socket).await;
        assert_eq!(welcome["type"], "welcome");
        let snapshot = next_json(&mut socket).await;
        assert_eq!(snapshot["type"], "snapshot");
        assert_eq!(snapshot["state"]["players"][0]["name"], "Player 1");

        socket
            .send(WsMessage::Text(r#"{"type":"ping","t":42}"#.into()))
            .await
            .unwrap();
        let pong = loop {
            let value = next_json(&mut socket).await;
            if value["type"] == "pong" {
                break value;
            }
        };
        assert_eq!(pong["t"], 42);

        shutdown.cancel();
    }
}
