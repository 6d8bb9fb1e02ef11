//! Workout partner matching
//!
//! Scores every other identity against the caller from two signals: how
//! many hours their upcoming calendars overlap, and how similar their
//! preference tags are. The scoring functions are pure; [`MatchService`]
//! only gathers their inputs from the store.

use crate::core::error::{Error, Result};
use crate::core::models::{CalendarEvent, Identity, IdentitySummary};
use crate::core::store::Store;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

/// Overlap at which the schedule half of the score saturates
pub const OVERLAP_CAP_HOURS: f64 = 5.0;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;
const MAX_DAYS_AHEAD: i64 = 365;

/// Tunables for one matching run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    /// Minimum schedule overlap that qualifies a candidate on its own
    pub threshold_hours: f64,
    /// How far ahead other users' shared events are considered
    pub days_ahead: i64,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            threshold_hours: 0.5,
            days_ahead: 14,
        }
    }
}

impl MatchParams {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold_hours.is_finite() || self.threshold_hours < 0.0 {
            return Err(Error::BadRequest(
                "threshold must be a non-negative number of hours".into(),
            ));
        }
        if !(0..=MAX_DAYS_AHEAD).contains(&self.days_ahead) {
            return Err(Error::BadRequest(format!(
                "days_ahead must be between 0 and {}",
                MAX_DAYS_AHEAD
            )));
        }
        Ok(())
    }
}

/// One ranked candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub user: IdentitySummary,
    pub compatibility_score: f64,
    /// Hours, rounded to one decimal
    pub overlap_hours: f64,
    /// Jaccard similarity as a rounded percentage
    pub preference_match: u32,
    pub shared_preferences: Vec<String>,
}

/// Jaccard similarity of two tag sets plus the tags they share
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceSimilarity {
    pub jaccard: f64,
    pub shared: Vec<String>,
}

/// Total pairwise intersection of two event lists, in hours.
///
/// Events are half-open `[start, end)`, so touching events contribute
/// nothing. The sum is symmetric in its arguments.
pub fn overlap_hours(mine: &[CalendarEvent], theirs: &[CalendarEvent]) -> f64 {
    let millis: i64 = mine
        .iter()
        .flat_map(|a| theirs.iter().map(move |b| (a, b)))
        .map(|(a, b)| {
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            (end - start).num_milliseconds().max(0)
        })
        .sum();
    millis as f64 / MILLIS_PER_HOUR
}

pub fn preference_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> PreferenceSimilarity {
    let shared: Vec<String> = a.intersection(b).cloned().collect();
    let union = a.union(b).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        shared.len() as f64 / union as f64
    };
    PreferenceSimilarity { jaccard, shared }
}

/// Blend capped overlap and preference similarity equally, in `[0, 1]`
pub fn compatibility_score(overlap_hours: f64, preference_match: f64) -> f64 {
    let schedule = (overlap_hours / OVERLAP_CAP_HOURS).clamp(0.0, 1.0);
    let preferences = preference_match.clamp(0.0, 1.0);
    0.5 * schedule + 0.5 * preferences
}

/// Score, filter and order candidates for `me`.
///
/// A candidate qualifies with enough overlap or with any shared tag. Ties
/// on score are ordered by identity id.
pub fn rank_candidates(
    me: &Identity,
    my_events: &[CalendarEvent],
    candidates: &[(Identity, Vec<CalendarEvent>)],
    threshold_hours: f64,
) -> Vec<MatchResult> {
    let mut results: Vec<MatchResult> = candidates
        .iter()
        .filter_map(|(other, their_events)| {
            let overlap = overlap_hours(my_events, their_events);
            let similarity = preference_similarity(&me.preference_tags, &other.preference_tags);

            if overlap < threshold_hours && similarity.shared.is_empty() {
                return None;
            }

            Some(MatchResult {
                user: other.summary(),
                compatibility_score: compatibility_score(overlap, similarity.jaccard),
                overlap_hours: (overlap * 10.0).round() / 10.0,
                preference_match: (similarity.jaccard * 100.0).round() as u32,
                shared_preferences: similarity.shared,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.compatibility_score
            .total_cmp(&a.compatibility_score)
            .then_with(|| a.user.id.cmp(&b.user.id))
    });
    results
}

/// Reads calendars and preferences, then ranks
pub struct MatchService {
    store: Arc<Store>,
}

impl MatchService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn matches_for(
        &self,
        user_id: &str,
        params: MatchParams,
    ) -> Result<Vec<MatchResult>> {
        params.validate()?;

        let me = self
            .store
            .find_identity(user_id)
            .await?
            .ok_or_else(|| Error::InvalidUserId(user_id.to_string()))?;

        let others = self.store.list_identities_except(user_id).await?;
        if others.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let my_events = self.store.future_events(user_id, now).await?;

        let mut shared_by_owner: HashMap<String, Vec<CalendarEvent>> = HashMap::new();
        for event in self
            .store
            .shared_events_starting_between(user_id, now, now + Duration::days(params.days_ahead))
            .await?
        {
            shared_by_owner
                .entry(event.owner_id.clone())
                .or_default()
                .push(event);
        }

        let candidates: Vec<(Identity, Vec<CalendarEvent>)> = others
            .into_iter()
            .map(|other| {
                let events = shared_by_owner.remove(&other.id).unwrap_or_default();
                (other, events)
            })
            .collect();

        let results = rank_candidates(&me, &my_events, &candidates, params.threshold_hours);
        info!(
            "[Matches] {} -> {} of {} candidates",
            user_id,
            results.len(),
            candidates.len()
        );
        Ok(results)
    }
}
