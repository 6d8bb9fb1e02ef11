use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use crate::social::matching::{MatchParams, MatchResult};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct MatchQuery {
    pub threshold: Option<f64>,
    pub days_ahead: Option<i64>,
}

impl MatchQuery {
    fn params(&self) -> MatchParams {
        let defaults = MatchParams::default();
        MatchParams {
            threshold_hours: self.threshold.unwrap_or(defaults.threshold_hours),
            days_ahead: self.days_ahead.unwrap_or(defaults.days_ahead),
        }
    }
}

/// GET /matches
pub async fn get_matches(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): Query<MatchQuery>,
) -> Result<Json<Vec<MatchResult>>> {
    let matches = state.matches.matches_for(ctx.user_id(), query.params()).await?;
    Ok(Json(matches))
}
