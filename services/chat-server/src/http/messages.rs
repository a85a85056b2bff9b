use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chat_core::model::{ConversationRow, Message};
use chat_protocol::{ChatsResponse, ConversationSummary, HistoryPage, MessageDto};
use serde::Deserialize;

use super::response::{bad_request, delivery_error, unauthorized, HttpResponse};
use crate::auth::{extract_bearer, validate_token};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SendMessageBody {
    pub content: String,
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub before_id: Option<i64>,
}

impl HistoryQuery {
    /// `before_id=0` means "no cursor" (message ids start at 1), same as
    /// omitting the query parameter entirely.
    fn cursor(&self) -> Option<i64> {
        self.before_id.filter(|&id| id != 0)
    }
}

fn default_limit() -> i64 {
    50
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<i64, HttpResponse> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .ok_or_else(|| unauthorized("missing bearer token"))?;
    validate_token(&state.pool, token)
        .await
        .map(|claims| claims.user_id)
        .ok_or_else(|| unauthorized("invalid or revoked token"))
}

fn to_dto(message: Message) -> MessageDto {
    let kind = match message.kind {
        chat_core::model::MessageKind::Text => chat_protocol::MessageKind::Text,
        chat_core::model::MessageKind::Image => chat_protocol::MessageKind::Image,
        chat_core::model::MessageKind::System => chat_protocol::MessageKind::System,
    };
    let status = match message.status {
        chat_core::model::MessageStatus::Pending => "pending",
        chat_core::model::MessageStatus::Sent => "sent",
        chat_core::model::MessageStatus::Delivered => "delivered",
    };
    MessageDto {
        id: message.id,
        sender_id: message.sender,
        recipient_id: message.recipient,
        kind,
        content: message.content,
        media_url: message.media_url,
        timestamp: message.timestamp,
        status: status.to_owned(),
    }
}

fn to_summary(row: ConversationRow) -> ConversationSummary {
    ConversationSummary {
        peer_id: row.peer_id,
        is_group: row.is_group,
        last_message: to_dto(row.last_message),
    }
}

/// POST /v1/users/:id/messages
pub async fn send_p2p(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(recipient): Path<i64>,
    Json(body): Json<SendMessageBody>,
) -> impl IntoResponse {
    let sender = match authenticate(&state, &headers).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.content.is_empty() && body.media_url.as_deref().unwrap_or_default().is_empty() {
        return bad_request("content or media_url is required");
    }
    match state
        .delivery
        .send_p2p(sender, recipient, body.content, body.media_url)
        .await
    {
        Ok(message) => (StatusCode::CREATED, Json(to_dto(message))).into_response(),
        Err(e) => delivery_error(e),
    }
}

/// POST /v1/groups/:id/messages
pub async fn send_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group): Path<i64>,
    Json(body): Json<SendMessageBody>,
) -> impl IntoResponse {
    let sender = match authenticate(&state, &headers).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.content.is_empty() && body.media_url.as_deref().unwrap_or_default().is_empty() {
        return bad_request("content or media_url is required");
    }
    match state
        .delivery
        .send_group(sender, group, body.content, body.media_url)
        .await
    {
        Ok(message) => (StatusCode::CREATED, Json(to_dto(message))).into_response(),
        Err(e) => delivery_error(e),
    }
}

/// GET /v1/users/:id/messages
pub async fn p2p_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(peer): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let viewer = match authenticate(&state, &headers).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state
        .delivery
        .p2p_history(viewer, peer, query.limit, query.cursor())
        .await
    {
        Ok(messages) => Json(HistoryPage {
            messages: messages.into_iter().map(to_dto).collect(),
        })
        .into_response(),
        Err(e) => delivery_error(e),
    }
}

/// GET /v1/groups/:id/messages
pub async fn group_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let viewer = match authenticate(&state, &headers).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state
        .delivery
        .group_history(viewer, group, query.limit, query.cursor())
        .await
    {
        Ok(messages) => Json(HistoryPage {
            messages: messages.into_iter().map(to_dto).collect(),
        })
        .into_response(),
        Err(e) => delivery_error(e),
    }
}

/// GET /v1/chats
pub async fn recent_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let viewer = match authenticate(&state, &headers).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.delivery.recent_conversations(viewer).await {
        Ok(rows) => Json(ChatsResponse {
            conversations: rows.into_iter().map(to_summary).collect(),
        })
        .into_response(),
        Err(e) => delivery_error(e),
    }
}
