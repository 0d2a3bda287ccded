//! REST endpoint for paging through a conversation's stored messages.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::model::{Message, UserId};
use crate::state::AppState;

/// Default page size for message history.
const DEFAULT_LIMIT: usize = 50;
/// Maximum page size for message history.
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Only messages with a smaller id (cursor from the previous page)
    pub before: Option<u64>,
    pub limit: Option<usize>,
    /// Conversation to read. Required for agents, ignored for end-users.
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Oldest first
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// GET /api/chat/history?before=<id>&limit=<n>[&user_id=<id>]
/// End-users read their own conversation; agents name the end-user.
pub async fn get_history(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let user_id = if claims.is_agent() {
        query.user_id.ok_or(StatusCode::BAD_REQUEST)?
    } else {
        claims.sub
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let store = state.store.clone();
    let before = query.before;
    let mut messages = tokio::task::spawn_blocking(move || {
        // One extra row tells us whether another page exists
        match before {
            Some(before_id) => store.messages_before(user_id, before_id, limit + 1),
            None => store.last_messages(user_id, limit + 1),
        }
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|e| {
        tracing::error!(user_id = user_id, error = %e, "Failed to load history");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let has_more = messages.len() > limit;
    if has_more {
        messages.remove(0);
    }

    Ok(Json(HistoryResponse { messages, has_more }))
}
