//! WebSocket endpoint: connection lifecycle around the gateway.

mod gateway;

pub use gateway::{ConnId, Gateway, Outbound, SyncResult};

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use clipforge_models::{WsClientFrame, WsServerFrame};

use crate::state::AppState;

/// A send that blocks longer than this marks the peer as slow.
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Clients ping every 25 s; a silent connection is dead after this.
const WS_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let gateway = Arc::clone(&state.gateway);
    let (conn_id, outbound) = gateway.register();
    info!(%conn_id, "websocket connected");

    let (mut sender, mut receiver) = socket.split();

    // Writer task: drain the outbound queue; a slow peer is disconnected
    // rather than allowed to block fan-out.
    let writer_outbound = Arc::clone(&outbound);
    let writer = tokio::spawn(async move {
        while let Some(frame) = writer_outbound.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(_) => continue,
            };
            match tokio::time::timeout(WS_SEND_TIMEOUT, sender.send(Message::Text(json))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => break,
                Err(_) => {
                    warn!("websocket send timed out, dropping slow peer");
                    break;
                }
            }
        }
        sender
    });

    // Reader loop: subscription syncs and heartbeats.
    loop {
        let message = match tokio::time::timeout(WS_READ_TIMEOUT, receiver.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => {
                debug!(%conn_id, "websocket read timed out");
                break;
            }
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<WsClientFrame>(&text) {
                Ok(WsClientFrame::SyncSubscriptions { project_ids }) => {
                    gateway.sync_subscriptions(&conn_id, &project_ids).await;
                }
                Ok(WsClientFrame::Ping) => {
                    outbound.push(WsServerFrame::Pong);
                }
                Err(e) => {
                    outbound.push(WsServerFrame::error(format!("invalid frame: {e}")));
                }
            },
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
            Message::Binary(_) => {
                outbound.push(WsServerFrame::error("binary frames not supported"));
            }
        }

        if writer.is_finished() {
            break;
        }
    }

    gateway.unregister(&conn_id);
    outbound.close();
    writer.abort();
    info!(%conn_id, "websocket disconnected");
}
