//! WebSocket feed of the notification list.
//!
//! Protocol:
//! ← Server sends: {"type":"notifications","items":[...],"unread":n}   (on connect and on every change)
//! → Client sends: {"type":"mark_read","id":"..."} | {"type":"mark_all_read"} | {"type":"ping"}
//! ← Server sends: {"type":"pong"} | {"type":"error","message":"..."}

use axum::{
    extract::{State, ws::{Message, WebSocket, WebSocketUpgrade}},
    response::IntoResponse,
};
use irrigo_core::Notification;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::server::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn snapshot(items: &[Notification]) -> serde_json::Value {
    serde_json::json!({
        "type": "notifications",
        "items": items,
        "unread": items.iter().filter(|n| !n.read).count(),
    })
}

/// Handle a WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("WebSocket client connected");

    // The listener runs under the notification lock, so it only queues.
    let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let listener_id = state.notifications().subscribe(Box::new(move |items| {
        let _ = tx.send(snapshot(items));
    }));

    loop {
        tokio::select! {
            Some(update) = rx.recv() => {
                if send_json(&mut socket, &update).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let json = match serde_json::from_str::<serde_json::Value>(&text) {
                        Ok(j) => j,
                        Err(e) => {
                            send_error(&mut socket, &format!("Invalid JSON: {e}")).await;
                            continue;
                        }
                    };
                    match json["type"].as_str().unwrap_or("unknown") {
                        "mark_read" => {
                            let id = json["id"].as_str().unwrap_or_default();
                            if !state.notifications().mark_read(id) {
                                send_error(&mut socket, "No unread notification with that id").await;
                            }
                        }
                        "mark_all_read" => {
                            state.notifications().mark_all_read();
                        }
                        "ping" => {
                            let _ = send_json(&mut socket, &serde_json::json!({"type": "pong"})).await;
                        }
                        other => {
                            send_error(&mut socket, &format!("Unknown message type: {other}")).await;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket receive error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    state.notifications().unsubscribe(listener_id);
    tracing::info!("WebSocket client disconnected");
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), ()> {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .map_err(|e| {
            tracing::error!("WS send failed: {e}");
        })
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let error = serde_json::json!({
        "type": "error",
        "message": message,
    });
    let _ = send_json(socket, &error).await;
}
