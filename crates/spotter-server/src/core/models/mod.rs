use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Maximum message length in characters.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// A user account as resolved by the identity subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    /// Contact handle searched alongside the display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub preference_tags: BTreeSet<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email: None,
            preference_tags: BTreeSet::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_preferences<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preference_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Public view of an identity used in listings and event payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub id: String,
    pub display_name: String,
}

/// The verified caller of a request, produced once by credential verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}

/// Response to a pending friend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Rejected,
}

impl Decision {
    pub fn status(self) -> RequestStatus {
        match self {
            Decision::Accepted => RequestStatus::Accepted,
            Decision::Rejected => RequestStatus::Rejected,
        }
    }
}

/// Friend request record. One row per unordered pair, re-used across
/// request cycles by flipping `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl FriendRequest {
    pub fn pending(sender_id: &str, recipient_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
        }
    }

    pub fn counterpart_of(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }
}

/// Undirected friendship edge with a per-user tombstone set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friendship {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub hidden_for: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    pub fn is_active_for(&self, user_id: &str) -> bool {
        !self.hidden_for.contains(user_id)
    }

    pub fn other(&self, user_id: &str) -> &str {
        if self.user_a == user_id {
            &self.user_b
        } else {
            &self.user_a
        }
    }
}

/// Direct message with read state and a per-user tombstone set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub read: bool,
    pub hidden_for: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender_id: &str, recipient_id: &str, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: content.into(),
            read: false,
            hidden_for: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn counterpart_of(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }
}

/// Availability slot owned by the calendar subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub shared: bool,
}

impl CalendarEvent {
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        shared: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            title: title.into(),
            start,
            end,
            shared,
        }
    }
}

/// Canonical key for an unordered pair of identities.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_ignores_order() {
        assert_eq!(pair_key("alice", "bob"), pair_key("bob", "alice"));
        assert_eq!(pair_key("alice", "bob"), "alice:bob");
    }

    #[test]
    fn request_status_parses_its_own_output() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Accepted,
            RequestStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<RequestStatus>().is_err());
    }

    #[test]
    fn friendship_visibility_is_per_user() {
        let mut friendship = Friendship {
            id: "f1".into(),
            user_a: "a".into(),
            user_b: "b".into(),
            hidden_for: BTreeSet::new(),
            created_at: Utc::now(),
        };
        friendship.hidden_for.insert("a".into());

        assert!(!friendship.is_active_for("a"));
        assert!(friendship.is_active_for("b"));
        assert_eq!(friendship.other("a"), "b");
        assert_eq!(friendship.other("b"), "a");
    }
}
