//! WebSocket push channel.
//!
//! Each connection is one notifier subscription. The server sends JSON text
//! frames (`{"type":"connected"}` first, then `data-changed` events) and
//! ignores anything the client sends except close.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use super::AppState;
use crate::notifier::{ChangeEvent, ChangeNotifier, Subscription};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let notifier = Arc::clone(state.coordinator.notifier());
    ws.on_upgrade(move |socket| handle_socket(socket, notifier))
}

async fn handle_socket(socket: WebSocket, notifier: Arc<ChangeNotifier>) {
    let Subscription { id, mut events } = notifier.subscribe().await;
    let (mut sender, mut receiver) = socket.split();

    if send_event(&mut sender, &ChangeEvent::Connected).await.is_ok() {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = send_event(&mut sender, &event).await {
                            tracing::debug!(subscriber = id, error = %e, "Push failed");
                            break;
                        }
                    }
                    // Notifier closed us, e.g. on shutdown.
                    None => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },
                message = receiver.next() => match message {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = id, error = %e, "Push channel read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    notifier.unsubscribe(id).await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ChangeEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize change event");
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
