use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::{Error, Result};
use crate::core::models::Identity;
use axum::extract::State;
use axum::Json;

/// GET /users/me
pub async fn me(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Identity>> {
    let identity = state
        .store
        .find_identity(ctx.user_id())
        .await?
        .ok_or(Error::NotFound("user"))?;

    Ok(Json(identity))
}
