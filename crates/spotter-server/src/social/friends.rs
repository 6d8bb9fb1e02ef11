//! Friend requests and friendships
//!
//! One request record exists per unordered pair and is re-used across
//! request cycles by flipping its status. Friendships are never deleted:
//! removing one adds the caller to its tombstone set, and accepting a later
//! request clears the set again on the same row.
//!
//! Two users requesting each other is the main race here. The pair's UNIQUE
//! key lets exactly one insert win; every guarded update that loses is
//! retried against the freshly read record.

use crate::core::error::{Error, Result};
use crate::core::models::{
    Decision, FriendRequest, Friendship, Identity, IdentityClaim, IdentitySummary, RequestStatus,
};
use crate::core::store::Store;
use crate::social::broker::{EventPublisher, ServerEvent};
use crate::social::notifier::{notify_best_effort, Notice, Notifier};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimum trimmed length of a candidate search query
pub const MIN_QUERY_CHARS: usize = 2;

const MAX_ATTEMPTS: usize = 5;

/// Result of a successful `send_request`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// The recipient now has a pending request from the caller
    Sent { request: FriendRequest },
    /// The recipient had already asked; the pair are now friends
    AutoAccepted {
        request: FriendRequest,
        friendship: Friendship,
    },
}

impl SendOutcome {
    pub fn request(&self) -> &FriendRequest {
        match self {
            SendOutcome::Sent { request } | SendOutcome::AutoAccepted { request, .. } => request,
        }
    }
}

/// Result of `respond`
#[derive(Debug, Clone, Serialize)]
pub struct RespondOutcome {
    pub request: FriendRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendship: Option<Friendship>,
}

/// Pending request with the identity on the other end
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: FriendRequest,
    pub counterpart: IdentitySummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRequestStatus {
    Sent,
    Received,
}

/// Search hit annotated with the caller's relationship to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub user: IdentitySummary,
    pub request_status: Option<CandidateRequestStatus>,
    pub previously_friended: bool,
}

/// Friend manager handles all friend-related operations
pub struct FriendManager {
    store: Arc<Store>,
    events: Arc<dyn EventPublisher>,
    notifier: Arc<dyn Notifier>,
    search_limit: i64,
}

impl FriendManager {
    pub fn new(
        store: Arc<Store>,
        events: Arc<dyn EventPublisher>,
        notifier: Arc<dyn Notifier>,
        search_limit: i64,
    ) -> Self {
        Self {
            store,
            events,
            notifier,
            search_limit: search_limit.max(1),
        }
    }

    /// Send a friend request, or accept the recipient's pending one
    pub async fn send_request(
        &self,
        caller: &IdentityClaim,
        recipient_id: &str,
    ) -> Result<SendOutcome> {
        if caller.id == recipient_id {
            return Err(Error::SelfRequest);
        }

        let recipient = self
            .store
            .find_identity(recipient_id)
            .await?
            .ok_or_else(|| Error::RecipientNotFound(recipient_id.to_string()))?;

        for attempt in 1..=MAX_ATTEMPTS {
            if let Some(outcome) = self.try_send(caller, &recipient).await? {
                self.announce(caller, &recipient, &outcome).await;
                return Ok(outcome);
            }
            debug!(
                "[Friends] {} -> {} lost a race, retrying ({}/{})",
                caller.id, recipient.id, attempt, MAX_ATTEMPTS
            );
        }

        Err(Error::Contended("friend request"))
    }

    /// One read-then-guarded-write pass. `None` means a concurrent writer
    /// changed the record in between and the pass should be repeated.
    async fn try_send(
        &self,
        caller: &IdentityClaim,
        recipient: &Identity,
    ) -> Result<Option<SendOutcome>> {
        let now = Utc::now();

        if let Some(friendship) = self.store.find_friendship(&caller.id, &recipient.id).await? {
            if friendship.is_active_for(&caller.id) {
                return Err(Error::AlreadyFriends);
            }
        }

        let Some(existing) = self
            .store
            .find_request_for_pair(&caller.id, &recipient.id)
            .await?
        else {
            let request = FriendRequest::pending(&caller.id, &recipient.id);
            return match self.store.insert_request(&request).await {
                Ok(()) => {
                    info!("[Friends] {} sent a request to {}", caller.id, recipient.id);
                    Ok(Some(SendOutcome::Sent { request }))
                }
                Err(e) if e.is_unique_violation() => Ok(None),
                Err(e) => Err(e),
            };
        };

        match existing.status {
            RequestStatus::Pending if existing.sender_id == caller.id => {
                Err(Error::DuplicatePending)
            }
            RequestStatus::Pending => {
                let Some((friendship, _)) = self.store.accept_request(&existing, now).await? else {
                    return Ok(None);
                };
                info!(
                    "[Friends] {} and {} asked each other, auto-accepted",
                    caller.id, recipient.id
                );
                let request = FriendRequest {
                    status: RequestStatus::Accepted,
                    responded_at: Some(now),
                    ..existing
                };
                Ok(Some(SendOutcome::AutoAccepted {
                    request,
                    friendship,
                }))
            }
            status => {
                let reopened = self
                    .store
                    .reopen_request(&existing.id, status, &caller.id, &recipient.id, now)
                    .await?;
                if !reopened {
                    return Ok(None);
                }
                info!(
                    "[Friends] {} re-sent a request to {} (was {})",
                    caller.id, recipient.id, status
                );
                let request = FriendRequest {
                    sender_id: caller.id.clone(),
                    recipient_id: recipient.id.clone(),
                    status: RequestStatus::Pending,
                    created_at: now,
                    responded_at: None,
                    ..existing
                };
                Ok(Some(SendOutcome::Sent { request }))
            }
        }
    }

    async fn announce(&self, caller: &IdentityClaim, recipient: &Identity, outcome: &SendOutcome) {
        let sender = summary_of(caller);
        match outcome {
            SendOutcome::Sent { request } => {
                self.events.publish(
                    &recipient.id,
                    ServerEvent::FriendRequest {
                        request_id: request.id.clone(),
                        sender: sender.clone(),
                        created_at: request.created_at,
                    },
                );
                notify_best_effort(
                    &self.notifier,
                    Notice::FriendRequestReceived {
                        recipient_id: recipient.id.clone(),
                        sender,
                    },
                )
                .await;
            }
            SendOutcome::AutoAccepted { request, .. } => {
                let accepted_at = request.responded_at.unwrap_or_else(Utc::now);
                self.events.publish(
                    &recipient.id,
                    ServerEvent::FriendRequestAccepted {
                        request_id: request.id.clone(),
                        friend: sender.clone(),
                        accepted_at,
                    },
                );
                self.events.publish(
                    &caller.id,
                    ServerEvent::FriendRequestAccepted {
                        request_id: request.id.clone(),
                        friend: recipient.summary(),
                        accepted_at,
                    },
                );
                notify_best_effort(
                    &self.notifier,
                    Notice::FriendRequestAccepted {
                        recipient_id: recipient.id.clone(),
                        friend: sender,
                    },
                )
                .await;
            }
        }
    }

    /// Accept or reject a pending request addressed to the caller
    pub async fn respond(
        &self,
        caller: &IdentityClaim,
        request_id: &str,
        decision: Decision,
    ) -> Result<RespondOutcome> {
        let request = self
            .store
            .find_request(request_id)
            .await?
            .ok_or(Error::NotFound("friend request"))?;

        if request.recipient_id != caller.id {
            return Err(Error::Forbidden("only the recipient can respond to a request"));
        }
        if request.status != RequestStatus::Pending {
            return Err(Error::AlreadyResolved);
        }

        let now = Utc::now();
        let resolved = FriendRequest {
            status: decision.status(),
            responded_at: Some(now),
            ..request.clone()
        };

        match decision {
            Decision::Rejected => {
                if !self
                    .store
                    .resolve_request(&request.id, &request.sender_id, RequestStatus::Rejected, now)
                    .await?
                {
                    return Err(Error::AlreadyResolved);
                }
                info!("[Friends] {} rejected request {}", caller.id, request.id);
                Ok(RespondOutcome {
                    request: resolved,
                    friendship: None,
                })
            }
            Decision::Accepted => {
                let (friendship, created) = self
                    .store
                    .accept_request(&request, now)
                    .await?
                    .ok_or(Error::AlreadyResolved)?;
                info!(
                    "[Friends] {} accepted request {} ({} friendship)",
                    caller.id,
                    request.id,
                    if created { "new" } else { "reactivated" }
                );

                let friend = summary_of(caller);
                self.events.publish(
                    &request.sender_id,
                    ServerEvent::FriendRequestAccepted {
                        request_id: request.id.clone(),
                        friend: friend.clone(),
                        accepted_at: now,
                    },
                );
                notify_best_effort(
                    &self.notifier,
                    Notice::FriendRequestAccepted {
                        recipient_id: request.sender_id.clone(),
                        friend,
                    },
                )
                .await;

                Ok(RespondOutcome {
                    request: resolved,
                    friendship: Some(friendship),
                })
            }
        }
    }

    /// Hide the friendship with `other_id` from the caller's side
    pub async fn remove_friendship(&self, caller: &IdentityClaim, other_id: &str) -> Result<()> {
        let friendship = self
            .store
            .find_friendship(&caller.id, other_id)
            .await?
            .filter(|f| f.is_active_for(&caller.id))
            .ok_or(Error::NotFound("friendship"))?;

        if !self.store.hide_friendship(&friendship.id, &caller.id).await? {
            return Err(Error::NotFound("friendship"));
        }

        let now = Utc::now();
        info!("[Friends] {} removed {}", caller.id, other_id);
        // The removal is durable; a stale request record is only cosmetic
        if let Err(e) = self.store.reject_request_for_pair(&caller.id, other_id, now).await {
            warn!(
                "[Friends] Could not close the request record for {} and {}: {}",
                caller.id, other_id, e
            );
        }

        self.events.publish(
            other_id,
            ServerEvent::FriendshipRemoved {
                removed_by: summary_of(caller),
                removed_at: now,
            },
        );
        Ok(())
    }

    /// Identities on the other end of friendships still active for `user_id`
    pub async fn list_friends(&self, user_id: &str) -> Result<Vec<Identity>> {
        self.store.active_friends(user_id).await
    }

    pub async fn list_received_requests(&self, user_id: &str) -> Result<Vec<RequestView>> {
        Ok(into_views(self.store.pending_received(user_id).await?))
    }

    pub async fn list_sent_requests(&self, user_id: &str) -> Result<Vec<RequestView>> {
        Ok(into_views(self.store.pending_sent(user_id).await?))
    }

    /// Find people to connect with by name or contact handle
    pub async fn search_candidates(&self, user_id: &str, query: &str) -> Result<Vec<Candidate>> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            return Err(Error::InvalidQuery {
                min: MIN_QUERY_CHARS,
            });
        }

        let friendships = self.store.friendships_of(user_id).await?;
        let active: HashSet<&str> = friendships
            .iter()
            .filter(|f| f.is_active_for(user_id))
            .map(|f| f.other(user_id))
            .collect();
        let hidden: HashSet<&str> = friendships
            .iter()
            .filter(|f| !f.is_active_for(user_id))
            .map(|f| f.other(user_id))
            .collect();

        let pending: HashMap<String, CandidateRequestStatus> = self
            .store
            .pending_involving(user_id)
            .await?
            .into_iter()
            .map(|r| {
                let status = if r.sender_id == user_id {
                    CandidateRequestStatus::Sent
                } else {
                    CandidateRequestStatus::Received
                };
                (r.counterpart_of(user_id).to_string(), status)
            })
            .collect();

        // Over-fetch so that dropping active friends still fills the page
        let fetch = self.search_limit + active.len() as i64;
        let found = self.store.search_identities(user_id, query, fetch).await?;

        let candidates: Vec<Candidate> = found
            .into_iter()
            .filter(|identity| !active.contains(identity.id.as_str()))
            .take(self.search_limit as usize)
            .map(|identity| Candidate {
                request_status: pending.get(&identity.id).copied(),
                previously_friended: hidden.contains(identity.id.as_str()),
                user: identity.summary(),
            })
            .collect();

        debug!(
            "[Friends] search {:?} by {} -> {} candidates",
            query,
            user_id,
            candidates.len()
        );
        Ok(candidates)
    }
}

fn summary_of(claim: &IdentityClaim) -> IdentitySummary {
    IdentitySummary {
        id: claim.id.clone(),
        display_name: claim.display_name.clone(),
    }
}

fn into_views(rows: Vec<(FriendRequest, Identity)>) -> Vec<RequestView> {
    rows.into_iter()
        .map(|(request, other)| RequestView {
            request,
            counterpart: other.summary(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_support::{seed, temp_store};
    use crate::social::broker::test_support::RecordingPublisher;
    use crate::social::notifier::test_support::RecordingNotifier;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<Store>,
        events: Arc<RecordingPublisher>,
        notifier: Arc<RecordingNotifier>,
        friends: Arc<FriendManager>,
    }

    async fn fixture() -> Fixture {
        let (dir, store) = temp_store().await;
        seed(
            &store,
            &[
                Identity::new("a", "Alice").with_email("alice@example.com"),
                Identity::new("b", "Bob").with_email("bob@example.com"),
                Identity::new("c", "Carol").with_email("carol@example.com"),
            ],
        )
        .await;
        let store = Arc::new(store);
        let events = Arc::new(RecordingPublisher::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let friends = Arc::new(FriendManager::new(
            store.clone(),
            events.clone(),
            notifier.clone(),
            20,
        ));
        Fixture {
            _dir: dir,
            store,
            events,
            notifier,
            friends,
        }
    }

    fn claim(id: &str) -> IdentityClaim {
        let name = match id {
            "a" => "Alice",
            "b" => "Bob",
            _ => "Carol",
        };
        IdentityClaim {
            id: id.into(),
            display_name: name.into(),
        }
    }

    #[tokio::test]
    async fn send_validates_the_recipient() {
        let fx = fixture().await;
        assert!(matches!(
            fx.friends.send_request(&claim("a"), "a").await,
            Err(Error::SelfRequest)
        ));
        assert!(matches!(
            fx.friends.send_request(&claim("a"), "ghost").await,
            Err(Error::RecipientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_pending_is_rejected() {
        let fx = fixture().await;
        let outcome = fx.friends.send_request(&claim("a"), "b").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Sent { .. }));
        assert_eq!(fx.events.names_for("b"), vec!["friend_request"]);
        assert_eq!(fx.notifier.sent.lock().len(), 1);

        assert!(matches!(
            fx.friends.send_request(&claim("a"), "b").await,
            Err(Error::DuplicatePending)
        ));
    }

    #[tokio::test]
    async fn reject_then_resend_reuses_the_request() {
        let fx = fixture().await;
        let first = fx.friends.send_request(&claim("a"), "b").await.unwrap();
        let id = first.request().id.clone();

        let received = fx.friends.list_received_requests("b").await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].request.id, id);
        assert_eq!(received[0].counterpart.display_name, "Alice");
        assert_eq!(fx.friends.list_sent_requests("a").await.unwrap().len(), 1);

        fx.friends.respond(&claim("b"), &id, Decision::Rejected).await.unwrap();
        assert!(fx.friends.list_received_requests("b").await.unwrap().is_empty());

        let again = fx.friends.send_request(&claim("a"), "b").await.unwrap();
        assert_eq!(again.request().id, id);
        assert_eq!(again.request().status, RequestStatus::Pending);
        let stored = fx.store.find_request(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn respond_checks_actor_and_state() {
        let fx = fixture().await;
        let id = fx.friends.send_request(&claim("a"), "b").await.unwrap().request().id.clone();

        assert!(matches!(
            fx.friends.respond(&claim("c"), &id, Decision::Accepted).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            fx.friends.respond(&claim("b"), "missing", Decision::Accepted).await,
            Err(Error::NotFound(_))
        ));

        let outcome = fx.friends.respond(&claim("b"), &id, Decision::Accepted).await.unwrap();
        assert!(outcome.friendship.is_some());
        assert!(fx.events.names_for("a").contains(&"friend_request_accepted"));

        assert!(matches!(
            fx.friends.respond(&claim("b"), &id, Decision::Accepted).await,
            Err(Error::AlreadyResolved)
        ));
        assert!(matches!(
            fx.friends.send_request(&claim("a"), "b").await,
            Err(Error::AlreadyFriends)
        ));
    }

    #[tokio::test]
    async fn reciprocal_request_auto_accepts() {
        let fx = fixture().await;
        fx.friends.send_request(&claim("a"), "b").await.unwrap();
        let outcome = fx.friends.send_request(&claim("b"), "a").await.unwrap();

        let SendOutcome::AutoAccepted { request, friendship } = outcome else {
            panic!("expected auto-accept");
        };
        assert_eq!(request.status, RequestStatus::Accepted);
        assert!(friendship.hidden_for.is_empty());
        assert!(fx.events.names_for("a").contains(&"friend_request_accepted"));
        assert!(fx.events.names_for("b").contains(&"friend_request_accepted"));
        assert_eq!(fx.friends.list_friends("a").await.unwrap()[0].id, "b");
        assert_eq!(fx.friends.list_friends("b").await.unwrap()[0].id, "a");
    }

    #[tokio::test]
    async fn concurrent_reciprocal_requests_settle_on_one_friendship() {
        for _ in 0..5 {
            let fx = fixture().await;
            let (left, right) = tokio::join!(
                {
                    let friends = fx.friends.clone();
                    tokio::spawn(async move { friends.send_request(&claim("a"), "b").await })
                },
                {
                    let friends = fx.friends.clone();
                    tokio::spawn(async move { friends.send_request(&claim("b"), "a").await })
                }
            );
            let left = left.unwrap().unwrap();
            let right = right.unwrap().unwrap();

            let accepted = [&left, &right]
                .iter()
                .filter(|o| matches!(o, SendOutcome::AutoAccepted { .. }))
                .count();
            assert_eq!(accepted, 1);

            let request = fx.store.find_request_for_pair("a", "b").await.unwrap().unwrap();
            assert_eq!(request.status, RequestStatus::Accepted);
            assert_eq!(fx.store.friendships_of("a").await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn removal_is_one_sided_and_reversible() {
        let fx = fixture().await;
        let id = fx.friends.send_request(&claim("a"), "b").await.unwrap().request().id.clone();
        let first = fx
            .friends
            .respond(&claim("b"), &id, Decision::Accepted)
            .await
            .unwrap()
            .friendship
            .unwrap();

        fx.friends.remove_friendship(&claim("a"), "b").await.unwrap();
        assert!(fx.friends.list_friends("a").await.unwrap().is_empty());
        assert_eq!(fx.friends.list_friends("b").await.unwrap().len(), 1);
        assert!(fx.events.names_for("b").contains(&"friendship_removed"));
        assert!(matches!(
            fx.friends.remove_friendship(&claim("a"), "b").await,
            Err(Error::NotFound(_))
        ));
        let request = fx.store.find_request(&id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Rejected);

        // A still shows as previously friended in search
        let hits = fx.friends.search_candidates("a", "bo").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].previously_friended);

        let resent = fx.friends.send_request(&claim("a"), "b").await.unwrap();
        assert_eq!(resent.request().id, id);
        let outcome = fx
            .friends
            .respond(&claim("b"), &id, Decision::Accepted)
            .await
            .unwrap();
        assert_eq!(outcome.friendship.unwrap().id, first.id);
        assert_eq!(fx.store.friendships_of("a").await.unwrap().len(), 1);
        assert_eq!(fx.friends.list_friends("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removal_succeeds_when_request_cleanup_fails() {
        let fx = fixture().await;
        let id = fx.friends.send_request(&claim("a"), "b").await.unwrap().request().id.clone();
        fx.friends.respond(&claim("b"), &id, Decision::Accepted).await.unwrap();

        // Friendships and their tombstones live in other tables
        sqlx::query("DROP TABLE friend_requests")
            .execute(fx.store.pool())
            .await
            .unwrap();

        fx.friends.remove_friendship(&claim("a"), "b").await.unwrap();
        assert!(fx.friends.list_friends("a").await.unwrap().is_empty());
        assert!(fx.events.names_for("b").contains(&"friendship_removed"));
    }

    #[tokio::test]
    async fn search_annotates_and_excludes_friends() {
        let fx = fixture().await;
        assert!(matches!(
            fx.friends.search_candidates("a", " b ").await,
            Err(Error::InvalidQuery { min: 2 })
        ));

        fx.friends.send_request(&claim("a"), "b").await.unwrap();
        fx.friends.send_request(&claim("c"), "a").await.unwrap();

        let hits = fx.friends.search_candidates("a", "example").await.unwrap();
        let by_id: HashMap<_, _> = hits.iter().map(|c| (c.user.id.as_str(), c)).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(by_id["b"].request_status, Some(CandidateRequestStatus::Sent));
        assert_eq!(by_id["c"].request_status, Some(CandidateRequestStatus::Received));
        assert!(!by_id["b"].previously_friended);

        fx.friends.send_request(&claim("a"), "c").await.unwrap();
        let hits = fx.friends.search_candidates("a", "example").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user.id, "b");
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_the_request() {
        let (dir, store) = temp_store().await;
        seed(&store, &[Identity::new("a", "Alice"), Identity::new("b", "Bob")]).await;
        let store = Arc::new(store);
        let friends = FriendManager::new(
            store.clone(),
            Arc::new(RecordingPublisher::default()),
            Arc::new(RecordingNotifier {
                fail: true,
                ..Default::default()
            }),
            20,
        );

        assert!(friends.send_request(&claim("a"), "b").await.is_ok());
        assert!(store.find_request_for_pair("a", "b").await.unwrap().is_some());
        drop(dir);
    }
}
