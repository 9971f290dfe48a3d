//! `EdgeGateway` (`§4.2`, `§6.3`): accepts inbound edge websockets and
//! validates the shared-secret + edge-identifier upgrade headers.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use chat_fabric_protocol::RouterFrame;

use crate::AppState;

const SECRET_HEADER: &str = "x-router-internal-secret";
const IDENTIFIER_HEADER: &str = "x-websocket-server-identifier";
const SYSTEM_CHANNEL_HEADER: &str = "x-is-system-message-socket";

pub async fn upgrade_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // `§6.3`: the secret check happens before the system-channel flag is
    // consulted, which in turn happens before the identifier-header check.
    let Some(provided_secret) = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!("router: edge upgrade missing secret header");
        return StatusCode::FORBIDDEN.into_response();
    };
    if provided_secret.as_bytes().ct_eq(state.router_secret.as_bytes()).unwrap_u8() != 1 {
        warn!("router: edge upgrade secret mismatch");
        return StatusCode::FORBIDDEN.into_response();
    }

    let is_system_channel = headers
        .get(SYSTEM_CHANNEL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let edge_id = if is_system_channel {
        uuid::Uuid::new_v4().to_string()
    } else {
        match headers.get(IDENTIFIER_HEADER).and_then(|v| v.to_str().ok()) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                warn!("router: non-system edge upgrade missing identifier header");
                return StatusCode::NOT_FOUND.into_response();
            },
        }
    };

    ws.on_upgrade(move |socket| handle_edge_connection(socket, state, edge_id, is_system_channel))
}

async fn handle_edge_connection(socket: WebSocket, state: Arc<AppState>, edge_id: String, is_system_channel: bool) {
    info!(edge_id = %edge_id, is_system_channel, "router: edge connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();

    let write_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let handle = state.registry.register(edge_id.clone(), outbound_tx, is_system_channel);
    if !is_system_channel {
        state.mode.note_edge_registered();
        state.mode.advertise_mode(&handle).await;
    }

    // Per `§9`'s "ownership of inbound tasks": every error in this loop is
    // handled inline; only a transport-level failure ends the loop.
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(axum::extract::ws::Message::Text(t)) => t.to_string(),
            Ok(axum::extract::ws::Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(edge_id = %edge_id, error = %err, "router: transport error, closing edge connection");
                break;
            },
        };

        let frame: RouterFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(err) => {
                // `§9`: unknown/malformed frame types fail fast but must
                // not kill an otherwise-healthy edge connection.
                warn!(edge_id = %edge_id, error = %err, "router: malformed frame, ignoring");
                continue;
            },
        };

        state.dispatcher.handle_frame(&edge_id, frame).await;
    }

    // `§4.2` disconnect cascade.
    state.registry.remove(&edge_id);
    let removed_from = state.locator.remove_edge_everywhere(&edge_id);
    info!(edge_id = %edge_id, removed_from, "router: edge disconnected, cascade complete");

    write_task.abort();
}
