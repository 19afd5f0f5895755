//! Live signal state over WebSocket
//!
//! Each connection gets every location's current state as JSON text frames,
//! then one frame per change. A client that reads slowly loses intermediate
//! states, never the latest one.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_states(socket, state))
}

async fn stream_states(mut socket: WebSocket, state: Arc<AppState>) {
    let mut subscriber = state.engine.subscribe();
    info!("Live client {} connected", subscriber.id());

    loop {
        tokio::select! {
            next = subscriber.recv() => {
                let Some(snapshot) = next else {
                    break;
                };
                let frame = match serde_json::to_string(snapshot.as_ref()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Failed to encode state for {}: {}", snapshot.location_id, e);
                        continue;
                    }
                };
                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => debug!("Ignoring client frame"),
                }
            }
        }
    }

    info!(
        "Live client {} disconnected ({} update(s) dropped)",
        subscriber.id(),
        subscriber.dropped()
    );
    state.engine.unsubscribe(subscriber);
}
