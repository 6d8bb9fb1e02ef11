//! Direct message handlers

use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use crate::core::models::Message;
use crate::social::conversations::ConversationSummary;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ConversationCleared {
    pub hidden: u64,
}

/// POST /messages
pub async fn send_message(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>)> {
    let message = state
        .conversations
        .send(ctx.claim(), &req.recipient_id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<Vec<ConversationSummary>>> {
    Ok(Json(state.conversations.list_conversations(ctx.user_id()).await?))
}

/// GET /messages/unread
pub async fn unread_count(State(state): State<AppState>, ctx: Ctx) -> Result<Json<UnreadCount>> {
    let count = state.conversations.unread_count(ctx.user_id()).await?;
    Ok(Json(UnreadCount { count }))
}

/// GET /messages/{other_id}
pub async fn get_conversation(
    Path(other_id): Path<String>,
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<Vec<Message>>> {
    Ok(Json(
        state
            .conversations
            .list_conversation(ctx.claim(), &other_id)
            .await?,
    ))
}

/// DELETE /messages/{other_id}
pub async fn delete_conversation(
    Path(other_id): Path<String>,
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<ConversationCleared>> {
    let hidden = state
        .conversations
        .delete_conversation(ctx.claim(), &other_id)
        .await?;
    Ok(Json(ConversationCleared { hidden }))
}

/// DELETE /messages/item/{message_id}
pub async fn delete_message(
    Path(message_id): Path<String>,
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<StatusCode> {
    state
        .conversations
        .delete_message(ctx.claim(), &message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
