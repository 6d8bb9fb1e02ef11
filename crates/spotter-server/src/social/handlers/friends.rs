//! Friend Request Handlers

use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use crate::core::models::{Decision, Identity};
use crate::social::friends::{Candidate, RequestView, RespondOutcome, SendOutcome};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SendFriendRequest {
    pub recipient_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub decision: Decision,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// POST /friends/requests
pub async fn send_friend_request(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<SendFriendRequest>,
) -> Result<Json<SendOutcome>> {
    let outcome = state.friends.send_request(ctx.claim(), &req.recipient_id).await?;
    Ok(Json(outcome))
}

/// GET /friends/requests/received
pub async fn list_received_requests(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<Vec<RequestView>>> {
    Ok(Json(state.friends.list_received_requests(ctx.user_id()).await?))
}

/// GET /friends/requests/sent
pub async fn list_sent_requests(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<Vec<RequestView>>> {
    Ok(Json(state.friends.list_sent_requests(ctx.user_id()).await?))
}

/// PUT /friends/requests/{request_id}
pub async fn respond_friend_request(
    Path(request_id): Path<String>,
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<RespondRequest>,
) -> Result<Json<RespondOutcome>> {
    let outcome = state
        .friends
        .respond(ctx.claim(), &request_id, req.decision)
        .await?;
    Ok(Json(outcome))
}

/// GET /friends
pub async fn list_friends(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Vec<Identity>>> {
    Ok(Json(state.friends.list_friends(ctx.user_id()).await?))
}

/// DELETE /friends/{user_id}
pub async fn remove_friend(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<StatusCode> {
    state.friends.remove_friendship(ctx.claim(), &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /friends/search?q=
pub async fn search_candidates(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Candidate>>> {
    Ok(Json(
        state.friends.search_candidates(ctx.user_id(), &query.q).await?,
    ))
}
