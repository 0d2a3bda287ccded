use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use crate::auth::{jwt, middleware::bearer_token};
use crate::state::AppState;
use crate::ws::actor;
use crate::ws::connection::Role;

/// Query parameters for WebSocket connection.
/// Browsers can't set headers on upgrade requests, so the token may come as
/// ?token=JWT; an Authorization: Bearer header is accepted as well.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid or missing (subject 0 included)
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws/chat?token=JWT
/// On auth failure, upgrades then immediately closes with the matching close
/// code. On success, runs the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .token
        .as_deref()
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();

    let (close_code, reason) = match jwt::validate_access_token(&state.jwt_secret, token) {
        Ok(claims) => {
            let role = Role::from_agent_flag(claims.is_agent());
            tracing::info!(
                user_id = claims.sub,
                role = role.as_str(),
                "WebSocket connection authenticated"
            );

            let hub = state.hub.clone();
            let chat = state.chat.clone();
            return ws
                .max_message_size(chat.max_frame_bytes)
                .max_frame_size(chat.max_frame_bytes)
                .on_upgrade(move |socket| {
                    actor::run_connection(socket, hub, claims.sub, role, chat)
                });
        }
        Err(err) => match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                (CLOSE_TOKEN_EXPIRED, "Token expired")
            }
            _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
        },
    };

    tracing::warn!(
        close_code = close_code,
        reason = reason,
        "WebSocket auth failed"
    );

    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code: close_code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
