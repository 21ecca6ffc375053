//! WebSocket connection lifecycle.
//!
//! Each accepted socket gets a session record, a writer task draining the
//! session's outbound queue, and a read loop that dispatches inbound frames
//! one at a time: message handling for a connection is strictly sequential.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::app::AppState;
use crate::domain::OutboundFrame;

/// Upgrade handler for the broker's single bidirectional endpoint.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let client_id = state.service.register(outbound_tx).await;
    debug!(client_id = %client_id, "Connection accepted");

    // Writer: the only task touching the sink. Ends on the close frame, on a
    // transport error, or when the session record (the sender) is dropped.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let result = match frame {
                OutboundFrame::Message(message) => match serde_json::to_string(&message) {
                    Ok(json) => sink.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(error = %e, "Failed to encode outbound message");
                        continue;
                    }
                },
                OutboundFrame::Ping => sink.send(Message::Ping(Vec::new().into())).await,
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                // Peer hung up mid-write; the read loop notices separately.
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                state.service.handle_message(client_id, text.as_str()).await;
            }
            Ok(Message::Pong(_)) => state.service.handle_pong(client_id).await,
            Ok(Message::Close(_)) => break,
            // Protocol pings are answered by the websocket layer itself;
            // binary frames have no meaning here.
            Ok(_) => {}
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Socket read failed");
                break;
            }
        }
    }

    state.service.handle_disconnect(client_id).await;
    writer.abort();
    debug!(client_id = %client_id, "Connection closed");
}
