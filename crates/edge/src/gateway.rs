//! `ClientGateway` / `UserDirectory` close path (`§4.5`): accepts client
//! websockets, validates the upgrade in the literal step order the spec
//! prescribes, and owns the per-connection inbound loop.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade, ws::WebSocket},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};

use chat_fabric_protocol::{ClientReply, ClientRequest, ErrorShape, RouterFrame, check_required_fields, error_codes};
use chat_fabric_store::SessionRow;

use crate::AppState;
use crate::directory::ClientHandle;

const TOKEN_HEADER: &str = "x-token";
const MANAGER_SECRET_HEADER: &str = "x-manager-secret";

pub async fn upgrade_handler(State(state): State<Arc<AppState>>, headers: HeaderMap, uri: Uri, ws: WebSocketUpgrade) -> Response {
    // `§4.5` step 1.
    if !uri.path().contains("/socket") {
        return StatusCode::NOT_FOUND.into_response();
    }

    // `§4.5` step 2.
    let Some(token) = extract_token(&headers, &uri) else {
        warn!("edge: upgrade missing token");
        return StatusCode::NOT_FOUND.into_response();
    };

    // `§4.5` step 3.
    if !token.contains(':') {
        warn!("edge: token missing ':' separator");
        return StatusCode::FORBIDDEN.into_response();
    }
    let session = match state.session_store.lookup(&token).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            warn!("edge: token did not resolve to a session");
            return StatusCode::FORBIDDEN.into_response();
        },
        Err(err) => {
            warn!(error = %err, "edge: session lookup failed, treating as unauthorized");
            return StatusCode::FORBIDDEN.into_response();
        },
    };

    // `§4.5` step 4: the trailing colon-segment of the *token*, distinct
    // from the push crate's composite-key convention (`§3.1`).
    let Some((_, application_id)) = token.rsplit_once(':') else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let application_id = application_id.to_string();

    // `§4.5` step 5.
    if !state.settings.try_accept(&application_id) {
        warn!(application_id = %application_id, "edge: rejected, inactive application or over capacity");
        return StatusCode::BAD_REQUEST.into_response();
    }

    // `§4.5` step 6.
    let is_manager = headers
        .get(MANAGER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == state.manager_secret);

    ws.on_upgrade(move |socket| handle_client_connection(socket, state, session, application_id, is_manager))
}

fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(v) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

async fn handle_client_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    session: SessionRow,
    application_id: String,
    is_manager: bool,
) {
    info!(
        app_user_id = %session.app_user_id,
        device_id = %session.device_id,
        application_id = %application_id,
        is_manager,
        "edge: client connected"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel();

    let write_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    // `§4.5` step 7: manager connections bypass the `UserDirectory`
    // entirely and receive only `ManagerFrame` traffic (sent from
    // `crate::peripherals`).
    if !is_manager {
        let handle = ClientHandle::new(
            session.app_user_id.clone(),
            session.device_id.clone(),
            application_id.clone(),
            outbound_tx.clone(),
        );
        if state.directory.add(handle) {
            state.router_pool.send_to_all(&RouterFrame::AddAppUserWebsocket {
                application_user_identifier: session.app_user_id.clone(),
            });
        }
    }

    let anti_spam = crate::anti_spam::AntiSpam::new();
    // `§3.1`: manager connections get a periodic `CONNECTED_USERS_INFO`
    // push on the same cadence as the status-ping peripheral, rather than
    // ever dispatching inbound frames.
    let mut manager_ticker = tokio::time::interval(crate::peripherals::PING_INTERVAL);
    manager_ticker.tick().await; // first tick fires immediately; skip it.

    loop {
        let msg = if is_manager {
            tokio::select! {
                msg = ws_rx.next() => msg,
                _ = manager_ticker.tick() => {
                    let frame = chat_fabric_protocol::ManagerFrame::ConnectedUsersInfo {
                        connected_users: state.settings.connected_users_snapshot(),
                    };
                    if let Ok(encoded) = serde_json::to_string(&frame) {
                        let _ = outbound_tx.send(axum::extract::ws::Message::Text(encoded.into()));
                    }
                    continue;
                },
            }
        } else {
            ws_rx.next().await
        };

        let Some(msg) = msg else { break };

        let text = match msg {
            Ok(axum::extract::ws::Message::Text(t)) => t.to_string(),
            Ok(axum::extract::ws::Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(app_user_id = %session.app_user_id, error = %err, "edge: transport error, closing client connection");
                break;
            },
        };

        if is_manager {
            // Manager connections are receive-only (`§3.1`); any inbound
            // frame is ignored rather than dispatched.
            continue;
        }

        // `§4.9` anti-spam gate, evaluated before anything else per frame.
        if !anti_spam.check() {
            let reply = ClientReply::error(ErrorShape::new(error_codes::MESSAGE_SPAM_EXCEPTION, "message rate limit exceeded"));
            if let Ok(encoded) = serde_json::to_string(&reply) {
                let _ = outbound_tx.send(axum::extract::ws::Message::Text(encoded.into()));
            }
            break;
        }

        // `§7`: a JSON parse failure is 10004; a structurally-valid object
        // missing a mandatory field is a distinct 10005 naming the field.
        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(err) => {
                warn!(app_user_id = %session.app_user_id, error = %err, "edge: malformed client frame");
                let reply = ClientReply::error(ErrorShape::new(error_codes::INVALID_MESSAGE_FORMAT, "malformed message"));
                if let Ok(encoded) = serde_json::to_string(&reply) {
                    let _ = outbound_tx.send(axum::extract::ws::Message::Text(encoded.into()));
                }
                continue;
            },
        };

        if let Err(e) = check_required_fields(&value) {
            warn!(app_user_id = %session.app_user_id, error_code = e.error_code, "edge: rejecting client frame");
            let reply = ClientReply::error(e);
            if let Ok(encoded) = serde_json::to_string(&reply) {
                let _ = outbound_tx.send(axum::extract::ws::Message::Text(encoded.into()));
            }
            continue;
        }

        let request: ClientRequest = match serde_json::from_value(value) {
            Ok(req) => req,
            Err(err) => {
                warn!(app_user_id = %session.app_user_id, error = %err, "edge: malformed client frame");
                let reply = ClientReply::error(ErrorShape::new(error_codes::INVALID_MESSAGE_FORMAT, "malformed message"));
                if let Ok(encoded) = serde_json::to_string(&reply) {
                    let _ = outbound_tx.send(axum::extract::ws::Message::Text(encoded.into()));
                }
                continue;
            },
        };

        let kind = request.kind();
        if let Some(reply) = state.inbound.handle(&session.app_user_id, request).await {
            match serde_json::to_string(&reply) {
                Ok(encoded) => {
                    let _ = outbound_tx.send(axum::extract::ws::Message::Text(encoded.into()));
                },
                Err(err) => warn!(kind, error = %err, "edge: failed to encode client reply"),
            }
        }
    }

    if !is_manager && state.directory.remove(&session.app_user_id, &session.device_id) {
        state.router_pool.send_to_all(&RouterFrame::RemoveAppUserWebsocket {
            application_user_identifier: session.app_user_id.clone(),
        });
    }
    state.settings.release(&application_id);

    info!(app_user_id = %session.app_user_id, device_id = %session.device_id, "edge: client disconnected");
    write_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Uri};

    #[test]
    fn token_is_read_from_header_first() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("tok-1"));
        let uri: Uri = "/socket?token=tok-2".parse().unwrap();
        assert_eq!(extract_token(&headers, &uri), Some("tok-1".to_string()));
    }

    #[test]
    fn token_falls_back_to_the_query_parameter() {
        let headers = HeaderMap::new();
        let uri: Uri = "/socket?token=tok-2".parse().unwrap();
        assert_eq!(extract_token(&headers, &uri), Some("tok-2".to_string()));
    }

    #[test]
    fn missing_token_anywhere_returns_none() {
        let headers = HeaderMap::new();
        let uri: Uri = "/socket".parse().unwrap();
        assert_eq!(extract_token(&headers, &uri), None);
    }

    #[test]
    fn application_id_is_the_trailing_colon_segment_of_the_token() {
        let token = "user:device:app-1";
        let (_, application_id) = token.rsplit_once(':').unwrap();
        assert_eq!(application_id, "app-1");
    }

    #[test]
    fn path_check_admits_any_path_containing_socket_not_just_an_exact_match() {
        // `§4.5` step 1: the path only has to *contain* `/socket`, so a
        // deployment mounting behind a prefix (`/v1/socket`) or with a
        // trailing slash (`/socket/`) must still be admitted. `build_router`
        // routes every path to this handler via `fallback`, making this the
        // only gate.
        for path in ["/socket", "/socket/", "/v1/socket"] {
            let uri: Uri = path.parse().unwrap();
            assert!(uri.path().contains("/socket"), "{path} should be admitted");
        }
        let uri: Uri = "/healthz".parse().unwrap();
        assert!(!uri.path().contains("/socket"));
    }
}
