//! WebSocket fan-out of engine progress events.
//!
//! Each connection subscribes to the broadcast bus and receives the JSON
//! form of every event on its stream (`scans` or `discovery`). Slow
//! consumers that fall behind the bus's replay buffer miss events rather
//! than blocking producers.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast;

use scanorama_core::events::{EventStream, ScanoramaEvent};

use crate::server::SharedState;

pub async fn scans(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx, EventStream::Scan))
}

pub async fn discovery(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, rx, EventStream::Discovery))
}

async fn stream_events(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<ScanoramaEvent>,
    stream: EventStream,
) {
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) if event.stream() == stream => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "WebSocket subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}
