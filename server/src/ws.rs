use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{Sink, SinkExt, StreamExt};
use presence_shared::protocol::{
    ClientMsg, ConnectionId, ServerMsg, WelcomeMsg, PROTOCOL_VERSION,
};
use tokio::sync::{broadcast, mpsc, oneshot, OwnedSemaphorePermit, Semaphore};

use crate::dispatcher::InboundEvent;
use crate::hub::{HubCommand, OutboundFrame};

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub hub_tx: mpsc::Sender<HubCommand>,
    pub broadcast_tx: broadcast::Sender<Arc<OutboundFrame>>,
    pub connection_semaphore: Arc<Semaphore>,
    pub max_message_bytes: usize,
    pub max_parse_errors: u32,
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    let permit = match app_state.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!("Connection limit reached, refusing upgrade");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };
    // The frame reader refuses anything larger, so it is never buffered whole
    ws.max_message_size(app_state.max_message_bytes)
        .max_frame_size(app_state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, app_state, permit))
}

async fn handle_socket(socket: WebSocket, app_state: AppState, _permit: OwnedSemaphorePermit) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before asking for an id so no delivery addressed to us is missed
    let mut broadcast_rx = app_state.broadcast_tx.subscribe();

    let (resp_tx, resp_rx) = oneshot::channel();
    if app_state
        .hub_tx
        .send(HubCommand::Connect { response: resp_tx })
        .await
        .is_err()
    {
        tracing::error!("Failed to send Connect command");
        return;
    }
    let my_id = match resp_rx.await {
        Ok(id) => id,
        Err(_) => {
            tracing::error!("Failed to receive connection id");
            return;
        }
    };

    tracing::info!("Connection {} opened", my_id);

    let welcome = ServerMsg::Welcome(WelcomeMsg {
        protocol_version: PROTOCOL_VERSION,
        user_id: my_id,
    });
    if send_msg(&mut sink, &welcome).await.is_err() {
        forward(&app_state, my_id, InboundEvent::Disconnect).await;
        return;
    }

    let mut parse_errors: u32 = 0;

    loop {
        tokio::select! {
            // Client -> Server
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str().len() > app_state.max_message_bytes {
                            tracing::warn!(
                                "Connection {} sent {} bytes, closing",
                                my_id,
                                text.as_str().len()
                            );
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        match serde_json::from_str::<ClientMsg>(text.as_str()) {
                            Ok(ClientMsg::Ping) => {
                                if send_msg(&mut sink, &ServerMsg::Pong).await.is_err() {
                                    break;
                                }
                            }
                            Ok(client_msg) => {
                                if let Some(event) = InboundEvent::from_client(client_msg) {
                                    forward(&app_state, my_id, event).await;
                                }
                            }
                            Err(e) => {
                                parse_errors += 1;
                                tracing::debug!("Connection {} sent bad frame: {}", my_id, e);
                                if parse_errors >= app_state.max_parse_errors {
                                    tracing::warn!(
                                        "Connection {} exceeded {} parse errors, closing",
                                        my_id,
                                        app_state.max_parse_errors
                                    );
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("Connection {} errored: {}", my_id, e);
                        break;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }

            // Server -> Client
            result = broadcast_rx.recv() => {
                match result {
                    Ok(frame) => {
                        if !frame.audience.includes(my_id) {
                            continue;
                        }
                        if sink.send(Message::Text(frame.text.clone())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Movement is re-sent on the next significant move, so skipping is fine
                        tracing::warn!("Connection {} lagged by {} messages", my_id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Cleanup on disconnect
    forward(&app_state, my_id, InboundEvent::Disconnect).await;
    tracing::info!("Connection {} closed", my_id);
}

async fn forward(app_state: &AppState, id: ConnectionId, event: InboundEvent) {
    if app_state
        .hub_tx
        .send(HubCommand::Inbound { id, event })
        .await
        .is_err()
    {
        tracing::error!("Hub is gone, dropping event from {}", id);
    }
}

async fn send_msg<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let json = serde_json::to_string(msg).map_err(|e| {
        tracing::warn!("Failed to serialize {}: {}", msg.event_name(), e);
    })?;
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
